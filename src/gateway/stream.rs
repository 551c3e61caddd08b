//! Download stream that owns its admission slot.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use crate::admission::AdmissionPermit;
use crate::storage::{ByteStream, StorageResult};

/// Wraps a backend stream and holds the download permit until the stream
/// ends, fails, or is dropped.
///
/// The stream is fused: after the first error or the end of the data it only
/// yields `None`.
pub struct PermitStream {
    inner: ByteStream,
    permit: Option<AdmissionPermit>,
}

impl PermitStream {
    pub fn new(inner: ByteStream, permit: AdmissionPermit) -> Self {
        Self {
            inner,
            permit: Some(permit),
        }
    }

    /// True until the stream has finished.
    pub fn holds_permit(&self) -> bool {
        self.permit.is_some()
    }
}

impl Stream for PermitStream {
    type Item = StorageResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.permit.is_none() {
            return Poll::Ready(None);
        }

        let polled = self.inner.as_mut().poll_next(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.permit = None;
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.permit.is_none() {
            (0, Some(0))
        } else {
            self.inner.size_hint()
        }
    }
}

impl std::fmt::Debug for PermitStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitStream")
            .field("holds_permit", &self.holds_permit())
            .finish()
    }
}
