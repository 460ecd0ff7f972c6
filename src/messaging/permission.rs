//! Permission caching capability
//!
//! The manager re-requests permission from the host on every acquisition by
//! default. Callers that want to remember a prior outcome inject a cache.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::PermissionStatus;

/// Source of a previously-decided permission outcome
#[async_trait]
pub trait PermissionCache: Send + Sync + 'static {
    /// A cached outcome, or `None` to ask the host
    async fn load(&self) -> Option<PermissionStatus>;

    /// Record the outcome of a host prompt
    async fn store(&self, status: PermissionStatus);
}

/// Default policy: never cache, prompt the host on every call
pub struct AlwaysAsk;

#[async_trait]
impl PermissionCache for AlwaysAsk {
    async fn load(&self) -> Option<PermissionStatus> {
        None
    }

    async fn store(&self, _status: PermissionStatus) {}
}

/// Remembers the last decided outcome for the process lifetime
///
/// Only `Granted` and `Denied` are decisions; a dismissed prompt is not
/// cached, so the host is asked again next time.
#[derive(Default)]
pub struct InMemoryPermissionCache {
    slot: RwLock<Option<PermissionStatus>>,
}

impl InMemoryPermissionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionCache for InMemoryPermissionCache {
    async fn load(&self) -> Option<PermissionStatus> {
        *self.slot.read().await
    }

    async fn store(&self, status: PermissionStatus) {
        if matches!(status, PermissionStatus::Granted | PermissionStatus::Denied) {
            *self.slot.write().await = Some(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_ask_never_remembers() {
        let cache = AlwaysAsk;
        cache.store(PermissionStatus::Granted).await;
        assert_eq!(cache.load().await, None);
    }

    #[tokio::test]
    async fn in_memory_cache_keeps_decisions_only() {
        let cache = InMemoryPermissionCache::new();
        assert_eq!(cache.load().await, None);

        cache.store(PermissionStatus::Default).await;
        assert_eq!(cache.load().await, None);

        cache.store(PermissionStatus::Denied).await;
        assert_eq!(cache.load().await, Some(PermissionStatus::Denied));

        cache.store(PermissionStatus::Granted).await;
        assert_eq!(cache.load().await, Some(PermissionStatus::Granted));
    }
}
