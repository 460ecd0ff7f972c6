//! Shared test backends
//!
//! Available behind the `test-util` feature or in `#[cfg(test)]` builds.
//! Provides an in-memory object store with chunked progress emission and
//! failure injection, and a scripted messaging backend with call counters.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};

use crate::error::{MessagingError, StorageError};
use crate::messaging::{MessagePayload, MessagingBackend, NotificationToken, PermissionStatus};
use crate::storage::{
    DownloadUrl, ObjectMetadata, ObjectStoreBackend, UploadEvent, UploadStream,
};

use async_trait::async_trait;

/// Default progress granularity of the in-memory store, in bytes
const DEFAULT_CHUNK_SIZE: usize = 32;

/// Initialise a tracing subscriber for tests.
///
/// Respects the `RUST_LOG` environment variable, defaults to `debug`.
/// Safe to call multiple times.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Build a foreground message with the given id and title
pub fn foreground_message(id: &str, title: &str) -> MessagePayload {
    MessagePayload {
        message_id: Some(id.to_string()),
        title: Some(title.to_string()),
        body: None,
        data: serde_json::Value::Null,
        received_at: Utc::now(),
    }
}

struct StoredObject {
    data: Bytes,
    uploaded_at: DateTime<Utc>,
}

/// In-memory object store backend
///
/// Uploads emit one progress event per chunk with a cooperative yield in
/// between, so state and progress interleavings are observable without
/// timers. Keys registered with `fail_upload` fail mid-transfer and leave no
/// object behind.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    objects: RwLock<HashMap<String, StoredObject>>,
    fail_keys: RwLock<HashSet<String>>,
    chunk_size: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                objects: RwLock::new(HashMap::new()),
                fail_keys: RwLock::new(HashSet::new()),
                chunk_size: chunk_size.max(1),
            }),
        }
    }

    /// Make the next upload to `key` fail after its first chunk
    pub async fn fail_upload(&self, key: &str) {
        self.inner.fail_keys.write().await.insert(key.to_string());
    }

    /// Seed an object directly, bypassing the upload path
    pub async fn insert(&self, key: &str, data: Bytes) {
        self.inner.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                uploaded_at: Utc::now(),
            },
        );
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.objects.read().await.contains_key(key)
    }

    fn url(key: &str) -> DownloadUrl {
        DownloadUrl::new(format!("mem://store/{}", key))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStoreBackend for InMemoryStore {
    fn begin_upload(&self, key: &str, payload: Bytes) -> UploadStream {
        let store = self.clone();
        let key = key.to_string();
        let (tx, mut rx) = mpsc::channel::<UploadEvent>(16);

        tokio::spawn(async move {
            let total = payload.len() as u64;
            let chunk_size = store.inner.chunk_size;

            let _ = tx
                .send(UploadEvent::Progress {
                    bytes_transferred: 0,
                    total_bytes: total,
                })
                .await;

            if store.inner.fail_keys.read().await.contains(&key) {
                let first = std::cmp::min(chunk_size, payload.len()) as u64;
                let _ = tx
                    .send(UploadEvent::Progress {
                        bytes_transferred: first,
                        total_bytes: total,
                    })
                    .await;
                tokio::task::yield_now().await;
                let _ = tx
                    .send(UploadEvent::Failed {
                        cause: "injected transfer failure".to_string(),
                    })
                    .await;
                return;
            }

            let mut sent: u64 = 0;
            for chunk in payload.chunks(chunk_size) {
                sent += chunk.len() as u64;
                let _ = tx
                    .send(UploadEvent::Progress {
                        bytes_transferred: sent,
                        total_bytes: total,
                    })
                    .await;
                tokio::task::yield_now().await;
            }

            store.insert(&key, payload).await;
            let _ = tx
                .send(UploadEvent::Completed {
                    url: Self::url(&key),
                })
                .await;
        });

        Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }

    async fn resolve_url(&self, key: &str) -> Result<DownloadUrl, StorageError> {
        if !self.contains(key).await {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(Self::url(key))
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        let objects = self.inner.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: object.data.len() as i64,
            last_modified: Some(object.uploaded_at),
            content_type: None,
            etag: None,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut objects = self.inner.objects.write().await;
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };

        let objects = self.inner.objects.read().await;
        Ok(objects
            .keys()
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .cloned()
            .collect())
    }
}

/// Scripted messaging backend
///
/// Permission and token outcomes are set up front; counters record how often
/// the manager touched each operation. `push_foreground` fans a message out
/// to every registered listener stream.
#[derive(Clone)]
pub struct StubMessaging {
    inner: Arc<MessagingInner>,
}

struct MessagingInner {
    supported: bool,
    permission: RwLock<PermissionStatus>,
    token: RwLock<String>,
    fail_fetch: RwLock<bool>,
    last_site_key: RwLock<Option<String>>,
    permission_requests: AtomicUsize,
    token_fetches: AtomicUsize,
    subscribers: Mutex<Vec<mpsc::Sender<MessagePayload>>>,
}

impl StubMessaging {
    pub fn new() -> Self {
        Self::with_support(true)
    }

    /// A backend reporting push messaging as unavailable
    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            inner: Arc::new(MessagingInner {
                supported,
                permission: RwLock::new(PermissionStatus::Granted),
                token: RwLock::new("stub-token".to_string()),
                fail_fetch: RwLock::new(false),
                last_site_key: RwLock::new(None),
                permission_requests: AtomicUsize::new(0),
                token_fetches: AtomicUsize::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Outcome of the next permission prompts
    pub async fn set_permission(&self, status: PermissionStatus) {
        *self.inner.permission.write().await = status;
    }

    /// Token value the backend will issue
    pub async fn set_token(&self, token: &str) {
        *self.inner.token.write().await = token.to_string();
    }

    /// Make subsequent token fetches fail
    pub async fn fail_token_fetch(&self) {
        *self.inner.fail_fetch.write().await = true;
    }

    /// Site key passed to the most recent fetch, if any
    pub async fn last_site_key(&self) -> Option<String> {
        self.inner.last_site_key.read().await.clone()
    }

    pub fn permission_requests(&self) -> usize {
        self.inner.permission_requests.load(Ordering::SeqCst)
    }

    pub fn token_fetches(&self) -> usize {
        self.inner.token_fetches.load(Ordering::SeqCst)
    }

    /// Deliver a foreground message to every registered listener
    pub async fn push_foreground(&self, message: MessagePayload) {
        let senders: Vec<mpsc::Sender<MessagePayload>> = match self.inner.subscribers.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        for tx in senders {
            let _ = tx.send(message.clone()).await;
        }
    }
}

impl Default for StubMessaging {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingBackend for StubMessaging {
    async fn check_supported(&self) -> bool {
        self.inner.supported
    }

    async fn request_permission(&self) -> Result<PermissionStatus, MessagingError> {
        self.inner.permission_requests.fetch_add(1, Ordering::SeqCst);
        Ok(*self.inner.permission.read().await)
    }

    async fn fetch_token(&self, site_key: &str) -> Result<NotificationToken, MessagingError> {
        self.inner.token_fetches.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_site_key.write().await = Some(site_key.to_string());

        if *self.inner.fail_fetch.read().await {
            return Err(MessagingError::TokenFetch(
                "injected token failure".to_string(),
            ));
        }
        Ok(NotificationToken::new(self.inner.token.read().await.clone()))
    }

    fn foreground_messages(&self) -> futures::stream::BoxStream<'static, MessagePayload> {
        let (tx, mut rx) = mpsc::channel(64);
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(tx);
        }
        Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }
}
