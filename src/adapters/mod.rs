//! Infrastructure Adapters
//!
//! Adapter implementations of the domain ports that are not storage
//! backends. Storage backends live in [`crate::storage`] and the metadata
//! store in [`crate::metadata`].
//!
//! # Usage
//!
//! ```ignore
//! use filegate::adapters::InMemoryEventCollector;
//!
//! let events = Arc::new(InMemoryEventCollector::new());
//! let gateway = gateway.with_event_publisher(Arc::clone(&events) as Arc<dyn EventPublisher>);
//! // ... run a pipeline ...
//! assert!(events.unreconciled().is_empty());
//! ```

mod event_publisher;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
