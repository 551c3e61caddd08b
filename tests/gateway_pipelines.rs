//! End-to-end pipeline tests: upload, download, info and delete over real
//! backends, backend selection, and the store-inconsistency paths.

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use assert_matches::assert_matches;
use bytes::Bytes;
use futures::StreamExt;

use common::{gateway_with, pools, FailingBackend, FlakyMetadataStore};
use filegate::domain::{FileRecord, MetadataStore, StorageBackend};
use filegate::metadata::InMemoryMetadataStore;
use filegate::storage::{collect_stream, source_from_bytes, InMemoryBackend, LocalFsBackend};
use filegate::{Error, FileGateway, FileId, GatewayConfig, OperationClass, UploadRequest};

const ONE_MIB: usize = 1024 * 1024;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn upload_of(data: Vec<u8>, name: &str) -> UploadRequest {
    let size = data.len() as u64;
    UploadRequest::new(source_from_bytes(data), name, "application/octet-stream", size)
}

// =============================================================================
// Happy Path
// =============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_one_mib_file_round_trip_on_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalFsBackend::new("local", dir.path(), 256 * 1024)
            .await
            .unwrap();
        let (gateway, events) = gateway_with(
            vec![Arc::new(local) as Arc<dyn StorageBackend>],
            pools(5, 10),
            Arc::new(InMemoryMetadataStore::new()),
        );

        let data = payload(ONE_MIB);
        let info = gateway.upload(upload_of(data.clone(), "a.bin")).await.unwrap();

        assert_eq!(info.file_name, "a.bin");
        assert_eq!(info.content_type, "application/octet-stream");
        assert_eq!(info.size, ONE_MIB as u64);

        let described = gateway.get_info(&info.id).await.unwrap();
        assert_eq!(described, info);

        let download = gateway.download(&info.id).await.unwrap();
        assert_eq!(download.file_name, "a.bin");
        assert_eq!(download.size, ONE_MIB as u64);
        let body = collect_stream(download.stream).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());

        assert!(gateway.delete(&info.id).await.unwrap());
        assert_matches!(gateway.delete(&info.id).await, Err(Error::NotFound(_)));
        assert_matches!(gateway.download(&info.id).await, Err(Error::NotFound(_)));
        assert_matches!(gateway.get_info(&info.id).await, Err(Error::NotFound(_)));

        assert_eq!(events.events_of_type("FileStored").len(), 1);
        assert_eq!(events.events_of_type("FileDeleted").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_id() {
        let (gateway, _) = gateway_with(
            vec![Arc::new(InMemoryBackend::new("mem")) as Arc<dyn StorageBackend>],
            pools(5, 10),
            Arc::new(InMemoryMetadataStore::new()),
        );

        assert_matches!(
            gateway.delete(&FileId::from("no-such-file")).await,
            Err(Error::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_download_of_unknown_id_leaves_admission_untouched() {
        let (gateway, _) = gateway_with(
            vec![Arc::new(InMemoryBackend::new("mem")) as Arc<dyn StorageBackend>],
            pools(5, 10),
            Arc::new(InMemoryMetadataStore::new()),
        );
        let before = gateway.admission_snapshot();

        let err = gateway
            .download(&FileId::from("no-such-file"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(gateway.admission_snapshot(), before);
    }

    #[tokio::test]
    async fn test_download_streams_in_chunks() {
        let backend = Arc::new(InMemoryBackend::with_chunk_size("mem", 64 * 1024));
        let (gateway, _) = gateway_with(
            vec![backend as Arc<dyn StorageBackend>],
            pools(5, 10),
            Arc::new(InMemoryMetadataStore::new()),
        );

        let info = gateway
            .upload(upload_of(payload(ONE_MIB), "big.bin"))
            .await
            .unwrap();

        let chunks: Vec<Bytes> = gateway
            .download(&info.id)
            .await
            .unwrap()
            .stream
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 16);
        assert!(chunks.iter().all(|c| c.len() == 64 * 1024));
    }

    #[tokio::test]
    async fn test_gateway_from_config() {
        let yaml = r#"
selection: round-robin
admission:
  upload_slots: 2
  download_slots: 3
backends:
  - kind: memory
    name: first
  - kind: memory
    name: second
"#;
        let config = GatewayConfig::from_yaml_str(yaml).unwrap();
        let gateway = FileGateway::from_config(&config).await.unwrap();

        assert_eq!(gateway.selector().registry().names(), vec!["first", "second"]);
        assert_eq!(gateway.admission().snapshot(OperationClass::Upload).capacity, 2);
        assert_eq!(gateway.admission().snapshot(OperationClass::Download).capacity, 3);

        let info = gateway
            .upload(upload_of(b"configured".to_vec(), "c.txt"))
            .await
            .unwrap();
        let body = collect_stream(gateway.download(&info.id).await.unwrap().stream)
            .await
            .unwrap();
        assert_eq!(body, "configured");
    }
}

// =============================================================================
// Backend Selection
// =============================================================================

mod selection_tests {
    use super::*;

    #[tokio::test]
    async fn test_round_robin_spreads_uploads() {
        let backends: Vec<Arc<InMemoryBackend>> = ["a", "b", "c"]
            .iter()
            .map(|n| Arc::new(InMemoryBackend::new(*n)))
            .collect();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let (gateway, _) = gateway_with(
            backends
                .iter()
                .map(|b| Arc::clone(b) as Arc<dyn StorageBackend>)
                .collect(),
            pools(5, 10),
            Arc::clone(&metadata) as Arc<dyn MetadataStore>,
        );

        let mut order = Vec::new();
        for i in 0..7 {
            let info = gateway
                .upload(upload_of(vec![1, 2, 3], &format!("{}.bin", i)))
                .await
                .unwrap();
            let record = metadata.get(&info.id).await.unwrap().unwrap();
            order.push(record.backend().to_string());
        }

        assert_eq!(order, vec!["a", "b", "c", "a", "b", "c", "a"]);

        let counts: Vec<u64> = backends.iter().map(|b| b.stats().object_count).collect();
        assert_eq!(counts, vec![3, 2, 2]);
    }

    #[tokio::test]
    async fn test_operations_follow_recorded_backend() {
        let backends: Vec<Arc<InMemoryBackend>> = ["a", "b"]
            .iter()
            .map(|n| Arc::new(InMemoryBackend::new(*n)))
            .collect();
        let (gateway, _) = gateway_with(
            backends
                .iter()
                .map(|b| Arc::clone(b) as Arc<dyn StorageBackend>)
                .collect(),
            pools(5, 10),
            Arc::new(InMemoryMetadataStore::new()),
        );

        let mut contents = HashMap::new();
        for i in 0..4u8 {
            let info = gateway
                .upload(upload_of(vec![i; 10], &format!("{}.bin", i)))
                .await
                .unwrap();
            contents.insert(info.id.clone(), vec![i; 10]);
        }

        for (id, expected) in &contents {
            let body = collect_stream(gateway.download(id).await.unwrap().stream)
                .await
                .unwrap();
            assert_eq!(body.as_ref(), expected.as_slice());
        }

        for id in contents.keys() {
            assert!(gateway.delete(id).await.unwrap());
        }
        assert!(backends.iter().all(|b| b.stats().object_count == 0));
    }

    #[tokio::test]
    async fn test_unregistered_backend_is_a_config_error() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let (gateway, _) = gateway_with(
            vec![Arc::new(InMemoryBackend::new("mem")) as Arc<dyn StorageBackend>],
            pools(5, 10),
            Arc::clone(&metadata) as Arc<dyn MetadataStore>,
        );

        let record = FileRecord::new("old.bin", "x/y", 3, "2023/01/01/k.bin", "retired", None);
        let id = record.id().clone();
        metadata.insert(record).await.unwrap();

        assert_matches!(gateway.download(&id).await, Err(Error::Config(_)));
        assert_eq!(gateway.admission().snapshot(OperationClass::Download).active, 0);
        assert_matches!(gateway.delete(&id).await, Err(Error::Config(_)));
        assert!(metadata.get(&id).await.unwrap().is_some());
    }
}

// =============================================================================
// Failure Paths
// =============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_transfer_releases_slot_and_commits_nothing() {
        let failing = Arc::new(FailingBackend::new("broken"));
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let (gateway, _) = gateway_with(
            vec![Arc::clone(&failing) as Arc<dyn StorageBackend>],
            pools(1, 1),
            Arc::clone(&metadata) as Arc<dyn MetadataStore>,
        );

        for i in 0..3 {
            let err = gateway
                .upload(upload_of(vec![0; 8], &format!("{}.bin", i)))
                .await
                .unwrap_err();
            assert_matches!(err, Error::Storage { ref backend, .. } if backend == "broken");
        }

        assert_eq!(failing.attempts.load(Ordering::SeqCst), 3);
        let snap = gateway.admission().snapshot(OperationClass::Upload);
        assert_eq!(snap.active, 0);
        assert_eq!(snap.available, 1);
        assert_eq!(metadata.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_orphan_and_reports_it() {
        let backend = Arc::new(InMemoryBackend::new("mem"));
        let metadata = Arc::new(FlakyMetadataStore::default());
        metadata.fail_insert.store(true, Ordering::SeqCst);
        let (gateway, events) = gateway_with(
            vec![Arc::clone(&backend) as Arc<dyn StorageBackend>],
            pools(1, 1),
            Arc::clone(&metadata) as Arc<dyn MetadataStore>,
        );

        let err = gateway
            .upload(upload_of(vec![9; 32], "orphan.bin"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Metadata(_));

        // Bytes stay behind with no record pointing at them
        assert_eq!(backend.stats().object_count, 1);
        assert_eq!(metadata.count().await.unwrap(), 0);

        let orphans = events.events_of_type("OrphanedObject");
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].backend(), "mem");
        assert_eq!(events.unreconciled().len(), 1);
        assert_eq!(gateway.admission().snapshot(OperationClass::Upload).active, 0);
    }

    #[tokio::test]
    async fn test_removal_failure_leaves_dangling_record() {
        let backend = Arc::new(InMemoryBackend::new("mem"));
        let metadata = Arc::new(FlakyMetadataStore::default());
        let (gateway, events) = gateway_with(
            vec![Arc::clone(&backend) as Arc<dyn StorageBackend>],
            pools(1, 1),
            Arc::clone(&metadata) as Arc<dyn MetadataStore>,
        );

        let info = gateway
            .upload(upload_of(vec![9; 32], "d.bin"))
            .await
            .unwrap();
        metadata.fail_remove.store(true, Ordering::SeqCst);

        assert_matches!(gateway.delete(&info.id).await, Err(Error::Metadata(_)));
        assert_eq!(backend.stats().object_count, 0);
        assert!(gateway.get_info(&info.id).await.is_ok());

        let dangling = events.events_of_type("DanglingRecord");
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].file_id(), Some(info.id.as_str()));
        // The earlier FileStored event is not part of the backlog
        assert_eq!(events.unreconciled().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_local_upload_leaves_no_partial_object() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalFsBackend::new("local", dir.path(), 64 * 1024)
            .await
            .unwrap();
        let (gateway, _) = gateway_with(
            vec![Arc::new(local) as Arc<dyn StorageBackend>],
            pools(1, 1),
            Arc::new(InMemoryMetadataStore::new()),
        );

        let pieces = vec![
            Ok(Bytes::from(vec![0u8; 100_000])),
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "client disconnected",
            )),
        ];
        let request = UploadRequest::new(
            filegate::storage::source_from_stream(futures::stream::iter(pieces)),
            "cut.bin",
            "application/octet-stream",
            200_000,
        );

        assert_matches!(gateway.upload(request).await, Err(Error::Storage { .. }));

        let mut pending = vec![dir.path().to_path_buf()];
        while let Some(path) = pending.pop() {
            for entry in std::fs::read_dir(path).unwrap() {
                let path = entry.unwrap().path();
                assert!(path.is_dir(), "unexpected file {}", path.display());
                pending.push(path);
            }
        }
    }
}
