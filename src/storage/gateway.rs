//! Object-store gateway
//!
//! Path-addressed CRUD and enumeration over a remote blob store, with
//! resumable-upload progress reporting. Every public operation sets the shared
//! state cell to `Loading` on entry and records exactly one terminal
//! transition (`Success`/`Error`) on resolution. The cell reflects the last
//! transition across all in-flight calls; the per-call outcome is the returned
//! result.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::StorageError;
use crate::state::{OperationState, StateCell};

use super::backend::{ObjectStoreBackend, UploadEvent};
use super::types::{DownloadUrl, ObjectMetadata, UploadProgress};

/// Gateway over a remote blob store
#[derive(Clone)]
pub struct ObjectStoreGateway {
    backend: Arc<dyn ObjectStoreBackend>,
    states: StateCell,
}

/// One in-flight resumable upload
///
/// Each job owns its progress channel; concurrent uploads report
/// independently. `join` resolves to the object's retrieval URL.
pub struct UploadJob {
    id: Uuid,
    key: String,
    progress: watch::Receiver<UploadProgress>,
    handle: JoinHandle<Result<DownloadUrl, StorageError>>,
}

impl UploadJob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Destination path key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Progress observable for this job. The channel closes after the
    /// terminal event; no update is published past that point.
    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.clone()
    }

    /// Wait for the terminal event
    pub async fn join(self) -> Result<DownloadUrl, StorageError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(StorageError::Backend(format!(
                "upload task for {} aborted: {}",
                self.key, e
            ))),
        }
    }
}

impl ObjectStoreGateway {
    pub fn new<B: ObjectStoreBackend>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            states: StateCell::new(),
        }
    }

    /// Snapshot of the shared state cell
    pub fn state(&self) -> OperationState {
        self.states.current()
    }

    /// Subscribe to state transitions. The cell holds the last applied
    /// transition across all calls, not a per-call status.
    pub fn states(&self) -> watch::Receiver<OperationState> {
        self.states.subscribe()
    }

    /// Begin a resumable upload of `payload` to `path`.
    ///
    /// State moves to `Loading` synchronously, before any I/O. The returned
    /// job carries the progress observable; dropping it does not cancel the
    /// transfer.
    pub fn start_upload(&self, path: impl Into<String>, payload: Bytes) -> UploadJob {
        let key = path.into();
        let id = Uuid::new_v4();

        self.states.set(OperationState::Loading);

        let (progress_tx, progress_rx) = watch::channel(UploadProgress::default());

        if let Err(e) = validate_key(&key) {
            self.states.set(OperationState::Error);
            tracing::warn!(job_id = %id, key = %key, "rejected upload: {}", e);
            let handle = tokio::spawn(async move { Err(e) });
            return UploadJob {
                id,
                key,
                progress: progress_rx,
                handle,
            };
        }

        tracing::debug!(job_id = %id, key = %key, bytes = payload.len(), "upload started");

        let backend = Arc::clone(&self.backend);
        let states = self.states.clone();
        let job_key = key.clone();

        let handle = tokio::spawn(async move {
            let mut stream = backend.begin_upload(&job_key, payload);
            let mut last = UploadProgress::default();

            while let Some(event) = stream.next().await {
                match event {
                    UploadEvent::Progress {
                        bytes_transferred,
                        total_bytes,
                    } => {
                        // The total is pinned to the first value the store
                        // commits to; regressing byte counts are dropped so
                        // the published fraction is monotonic.
                        let total = if last.total_bytes > 0 {
                            last.total_bytes
                        } else {
                            total_bytes
                        };
                        let capped = if total > 0 {
                            bytes_transferred.min(total)
                        } else {
                            bytes_transferred
                        };
                        if capped >= last.bytes_transferred {
                            last = UploadProgress {
                                bytes_transferred: capped,
                                total_bytes: total,
                            };
                            progress_tx.send_replace(last);
                        }
                    }
                    UploadEvent::Completed { url } => {
                        states.set(OperationState::Success);
                        tracing::info!(job_id = %id, key = %job_key, url = %url, "upload complete");
                        return Ok(url);
                    }
                    UploadEvent::Failed { cause } => {
                        states.set(OperationState::Error);
                        tracing::warn!(job_id = %id, key = %job_key, cause = %cause, "upload failed");
                        return Err(StorageError::Transfer {
                            key: job_key,
                            cause,
                        });
                    }
                }
            }

            states.set(OperationState::Error);
            Err(StorageError::Backend(format!(
                "upload stream for {} ended without a terminal event",
                job_key
            )))
        });

        UploadJob {
            id,
            key,
            progress: progress_rx,
            handle,
        }
    }

    /// Upload and wait for the retrieval URL
    pub async fn upload(
        &self,
        path: impl Into<String>,
        payload: Bytes,
    ) -> Result<DownloadUrl, StorageError> {
        self.start_upload(path, payload).join().await
    }

    /// Upload a batch of named payloads under `directory`, concurrently.
    ///
    /// Fails fast with the first subtask error; subtasks already handed to the
    /// store run to completion and their uploads are not rolled back. On
    /// success the URLs come back in input order regardless of completion
    /// order.
    pub async fn upload_many(
        &self,
        directory: &str,
        payloads: Vec<(String, Bytes)>,
    ) -> Result<Vec<DownloadUrl>, StorageError> {
        self.states.set(OperationState::Loading);

        if let Err(e) = validate_key(directory) {
            self.states.set(OperationState::Error);
            return Err(e);
        }

        let jobs: Vec<UploadJob> = payloads
            .into_iter()
            .map(|(name, payload)| self.start_upload(join_key(directory, &name), payload))
            .collect();

        let count = jobs.len();
        let result =
            futures::future::try_join_all(jobs.into_iter().map(UploadJob::join)).await;

        match result {
            Ok(urls) => {
                self.states.set(OperationState::Success);
                tracing::info!(directory = %directory, count, "fan-out upload complete");
                Ok(urls)
            }
            Err(e) => {
                self.states.set(OperationState::Error);
                tracing::warn!(directory = %directory, count, "fan-out upload failed: {}", e);
                Err(e)
            }
        }
    }

    /// Retrieval URL of an already-stored object
    pub async fn get_url(&self, path: &str) -> Result<DownloadUrl, StorageError> {
        self.states.set(OperationState::Loading);
        let result = match validate_key(path) {
            Ok(()) => self.backend.resolve_url(path).await,
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// Size, content type and last-modified of an object
    pub async fn get_metadata(&self, path: &str) -> Result<ObjectMetadata, StorageError> {
        self.states.set(OperationState::Loading);
        let result = match validate_key(path) {
            Ok(()) => self.backend.metadata(path).await,
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// Delete an object.
    ///
    /// Not idempotent: a second delete on the same path fails with
    /// `StorageError::NotFound`. Callers wanting idempotence match on it.
    pub async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.states.set(OperationState::Loading);
        let result = match validate_key(path) {
            Ok(()) => self.backend.delete(path).await,
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    /// Retrieval URLs for every direct object under `directory`.
    ///
    /// Order is store-defined. An empty directory is `Ok(vec![])`, not an
    /// error.
    pub async fn list(&self, directory: &str) -> Result<Vec<DownloadUrl>, StorageError> {
        self.states.set(OperationState::Loading);
        let result = self.list_inner(directory).await;
        self.finish(result)
    }

    async fn list_inner(&self, directory: &str) -> Result<Vec<DownloadUrl>, StorageError> {
        validate_key(directory)?;
        let keys = self.backend.list_prefix(directory).await?;
        futures::future::try_join_all(keys.iter().map(|key| self.backend.resolve_url(key)))
            .await
    }

    fn finish<T>(&self, result: Result<T, StorageError>) -> Result<T, StorageError> {
        match &result {
            Ok(_) => self.states.set(OperationState::Success),
            Err(e) => {
                self.states.set(OperationState::Error);
                tracing::debug!("storage operation failed: {}", e);
            }
        }
        result
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.trim().is_empty() {
        return Err(StorageError::InvalidKey("empty path key".to_string()));
    }
    if key.split('/').any(|segment| segment.is_empty()) {
        return Err(StorageError::InvalidKey(format!(
            "empty segment in {}",
            key
        )));
    }
    Ok(())
}

fn join_key(directory: &str, name: &str) -> String {
    format!("{}/{}", directory.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{init_test_tracing, InMemoryStore};

    #[tokio::test]
    async fn upload_transitions_loading_then_success() {
        init_test_tracing();
        let store = InMemoryStore::new();
        let gateway = ObjectStoreGateway::new(store.clone());

        let job = gateway.start_upload("covers/front.jpg", Bytes::from(vec![7u8; 256]));
        // State is set synchronously, before the job task runs
        assert_eq!(gateway.state(), OperationState::Loading);

        let url = job.join().await.unwrap();
        assert_eq!(gateway.state(), OperationState::Success);

        // The returned URL is the store's resolved URL for that key
        let resolved = store.resolve_url("covers/front.jpg").await.unwrap();
        assert_eq!(url, resolved);
    }

    #[tokio::test]
    async fn upload_failure_is_terminal_and_freezes_progress() {
        init_test_tracing();
        let store = InMemoryStore::new();
        store.fail_upload("covers/broken.jpg").await;
        let gateway = ObjectStoreGateway::new(store.clone());

        let job = gateway.start_upload("covers/broken.jpg", Bytes::from(vec![1u8; 512]));
        let progress = job.progress();

        let err = job.join().await.unwrap_err();
        assert!(matches!(err, StorageError::Transfer { ref key, .. } if key == "covers/broken.jpg"));
        assert_eq!(gateway.state(), OperationState::Error);
        assert!(!store.contains("covers/broken.jpg").await);

        // No progress update after the terminal event: the job's channel is
        // closed and the value stays frozen
        let frozen = *progress.borrow();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(*progress.borrow(), frozen);
    }

    #[tokio::test]
    async fn upload_progress_is_monotonic_within_unit_interval() {
        init_test_tracing();
        let store = InMemoryStore::with_chunk_size(64);
        let gateway = ObjectStoreGateway::new(store);

        let job = gateway.start_upload("data/blob.bin", Bytes::from(vec![0u8; 300]));
        let mut progress = job.progress();

        let collector = tokio::spawn(async move {
            let mut fractions = Vec::new();
            while progress.changed().await.is_ok() {
                if let Some(f) = progress.borrow().fraction() {
                    fractions.push(f);
                }
            }
            fractions
        });

        job.join().await.unwrap();
        let fractions = collector.await.unwrap();

        assert!(!fractions.is_empty());
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn upload_rejects_empty_key() {
        init_test_tracing();
        let gateway = ObjectStoreGateway::new(InMemoryStore::new());

        let err = gateway.upload("", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
        assert_eq!(gateway.state(), OperationState::Error);
    }

    #[tokio::test]
    async fn upload_many_returns_urls_in_input_order() {
        init_test_tracing();
        let store = InMemoryStore::new();
        let gateway = ObjectStoreGateway::new(store.clone());

        let payloads = vec![
            ("a.txt".to_string(), Bytes::from_static(b"aaa")),
            ("b.txt".to_string(), Bytes::from_static(b"bb")),
            ("c.txt".to_string(), Bytes::from_static(b"c")),
        ];

        let urls = gateway.upload_many("docs", payloads).await.unwrap();
        assert_eq!(gateway.state(), OperationState::Success);

        let expected = ["docs/a.txt", "docs/b.txt", "docs/c.txt"];
        for (url, key) in urls.iter().zip(expected) {
            assert_eq!(*url, store.resolve_url(key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn upload_many_fails_fast_without_rollback() {
        init_test_tracing();
        let store = InMemoryStore::new();
        store.fail_upload("docs/b.txt").await;
        let gateway = ObjectStoreGateway::new(store.clone());

        let payloads = vec![
            ("a.txt".to_string(), Bytes::from_static(b"aaa")),
            ("b.txt".to_string(), Bytes::from_static(b"bb")),
            ("c.txt".to_string(), Bytes::from_static(b"c")),
        ];

        let err = gateway.upload_many("docs", payloads).await.unwrap_err();
        assert!(matches!(err, StorageError::Transfer { ref key, .. } if key == "docs/b.txt"));

        // The surviving subtasks run to completion; give the scheduler a beat
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(store.contains("docs/a.txt").await);
        assert!(store.contains("docs/c.txt").await);
        assert!(!store.contains("docs/b.txt").await);
    }

    #[tokio::test]
    async fn get_url_absent_is_not_found() {
        init_test_tracing();
        let gateway = ObjectStoreGateway::new(InMemoryStore::new());

        let err = gateway.get_url("missing/object.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(gateway.state(), OperationState::Error);
    }

    #[tokio::test]
    async fn get_metadata_reports_size() {
        init_test_tracing();
        let store = InMemoryStore::new();
        store.insert("docs/report.pdf", Bytes::from(vec![0u8; 2048])).await;
        let gateway = ObjectStoreGateway::new(store);

        let metadata = gateway.get_metadata("docs/report.pdf").await.unwrap();
        assert_eq!(metadata.key, "docs/report.pdf");
        assert_eq!(metadata.size, 2048);
        assert_eq!(gateway.state(), OperationState::Success);
    }

    #[tokio::test]
    async fn delete_is_not_idempotent() {
        init_test_tracing();
        let store = InMemoryStore::new();
        store.insert("tmp/once.bin", Bytes::from_static(b"x")).await;
        let gateway = ObjectStoreGateway::new(store);

        gateway.delete("tmp/once.bin").await.unwrap();
        assert_eq!(gateway.state(), OperationState::Success);

        let err = gateway.delete("tmp/once.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(gateway.state(), OperationState::Error);
    }

    #[tokio::test]
    async fn delete_absent_is_not_found() {
        init_test_tracing();
        let gateway = ObjectStoreGateway::new(InMemoryStore::new());

        let err = gateway.delete("tmp/never.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_empty_directory_is_ok() {
        init_test_tracing();
        let gateway = ObjectStoreGateway::new(InMemoryStore::new());

        let urls = gateway.list("empty").await.unwrap();
        assert!(urls.is_empty());
        assert_eq!(gateway.state(), OperationState::Success);
    }

    #[tokio::test]
    async fn list_resolves_direct_objects_only() {
        init_test_tracing();
        let store = InMemoryStore::new();
        store.insert("docs/a.txt", Bytes::from_static(b"a")).await;
        store.insert("docs/b.txt", Bytes::from_static(b"b")).await;
        store.insert("docs/nested/c.txt", Bytes::from_static(b"c")).await;
        store.insert("other/d.txt", Bytes::from_static(b"d")).await;
        let gateway = ObjectStoreGateway::new(store.clone());

        let mut urls: Vec<String> = gateway
            .list("docs")
            .await
            .unwrap()
            .into_iter()
            .map(DownloadUrl::into_string)
            .collect();
        urls.sort();

        let mut expected: Vec<String> = Vec::new();
        for key in ["docs/a.txt", "docs/b.txt"] {
            expected.push(store.resolve_url(key).await.unwrap().into_string());
        }
        expected.sort();
        assert_eq!(urls, expected);
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("a/b/c").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("   ").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/b/").is_err());
        assert_eq!(join_key("docs/", "a.txt"), "docs/a.txt");
        assert_eq!(join_key("docs", "a.txt"), "docs/a.txt");
    }
}
