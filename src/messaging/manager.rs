//! Notification token manager
//!
//! Negotiates notification permission with the host environment, obtains a
//! messaging token, and surfaces foreground-delivered messages. Lifecycle is
//! published on a shared state cell, same contract as the storage gateway:
//! last transition wins, the per-call outcome is the returned result.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::MessagingConfig;
use crate::error::MessagingError;
use crate::state::{OperationState, StateCell};

use super::backend::MessagingBackend;
use super::permission::{AlwaysAsk, PermissionCache};
use super::types::{MessagePayload, NotificationToken, PermissionStatus};

/// Manager for push-messaging permission, token and foreground messages
#[derive(Clone)]
pub struct NotificationTokenManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    backend: Arc<dyn MessagingBackend>,
    permission_cache: Arc<dyn PermissionCache>,
    site_key: String,
    states: StateCell,
    latest: Arc<watch::Sender<Option<MessagePayload>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            for handle in listeners.drain(..) {
                handle.abort();
            }
        }
    }
}

impl NotificationTokenManager {
    /// Create a manager with the default permission policy (re-ask the host
    /// on every acquisition)
    pub fn new<B: MessagingBackend>(backend: B, config: &MessagingConfig) -> Self {
        Self::with_permission_cache(backend, config, AlwaysAsk)
    }

    /// Create a manager with an injected permission cache
    pub fn with_permission_cache<B, C>(backend: B, config: &MessagingConfig, cache: C) -> Self
    where
        B: MessagingBackend,
        C: PermissionCache,
    {
        let (latest, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(ManagerInner {
                backend: Arc::new(backend),
                permission_cache: Arc::new(cache),
                site_key: config.site_key.clone(),
                states: StateCell::new(),
                latest: Arc::new(latest),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Snapshot of the shared state cell
    pub fn state(&self) -> OperationState {
        self.inner.states.current()
    }

    /// Subscribe to state transitions
    pub fn states(&self) -> watch::Receiver<OperationState> {
        self.inner.states.subscribe()
    }

    /// Negotiate permission and fetch a messaging token.
    ///
    /// `Ok(None)` means the user refused (state `Unauthorized`) or dismissed
    /// the prompt (state `Inactive`); neither is an error. Nothing is cached
    /// across calls unless a `PermissionCache` was injected.
    pub async fn acquire_token(&self) -> Result<Option<NotificationToken>, MessagingError> {
        let inner = &self.inner;
        inner.states.set(OperationState::Loading);

        if !inner.backend.check_supported().await {
            inner.states.set(OperationState::Error);
            tracing::warn!("push messaging unsupported in this environment");
            return Err(MessagingError::UnsupportedEnvironment);
        }

        let permission = match inner.permission_cache.load().await {
            Some(cached) => {
                tracing::debug!(status = ?cached, "using cached permission outcome");
                cached
            }
            None => {
                let status = match inner.backend.request_permission().await {
                    Ok(status) => status,
                    Err(e) => {
                        inner.states.set(OperationState::Error);
                        return Err(e);
                    }
                };
                inner.permission_cache.store(status).await;
                status
            }
        };

        match permission {
            PermissionStatus::Granted => {
                match inner.backend.fetch_token(&inner.site_key).await {
                    Ok(token) => {
                        inner.states.set(OperationState::Success);
                        tracing::info!("messaging token acquired");
                        Ok(Some(token))
                    }
                    Err(e) => {
                        inner.states.set(OperationState::Error);
                        let cause = match e {
                            MessagingError::TokenFetch(cause) => cause,
                            other => other.to_string(),
                        };
                        tracing::warn!(cause = %cause, "token fetch failed");
                        Err(MessagingError::TokenFetch(cause))
                    }
                }
            }
            PermissionStatus::Denied => {
                inner.states.set(OperationState::Unauthorized);
                tracing::info!("notification permission denied by user");
                Ok(None)
            }
            PermissionStatus::Default => {
                inner.states.set(OperationState::Inactive);
                tracing::debug!("notification permission prompt dismissed");
                Ok(None)
            }
        }
    }

    /// Register a persistent foreground-message listener.
    ///
    /// Each inbound message overwrites the latest-message slot and invokes
    /// `on_message`. The listener lives until the manager is dropped. No
    /// backlog: observers comparing snapshots may miss intermediate messages.
    pub fn subscribe_foreground_messages<F>(&self, on_message: F)
    where
        F: Fn(MessagePayload) + Send + 'static,
    {
        let mut stream = self.inner.backend.foreground_messages();
        let latest = Arc::clone(&self.inner.latest);

        let handle = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                tracing::debug!(message_id = ?message.message_id, "foreground message received");
                latest.send_replace(Some(message.clone()));
                on_message(message);
            }
            tracing::debug!("foreground message stream ended");
        });

        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push(handle);
        }
    }

    /// Most recently received foreground message, if any
    pub fn latest_message(&self) -> Option<MessagePayload> {
        self.inner.latest.borrow().clone()
    }

    /// Subscribe to the latest-message slot (last-write-wins)
    pub fn messages(&self) -> watch::Receiver<Option<MessagePayload>> {
        self.inner.latest.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::permission::InMemoryPermissionCache;
    use crate::testing::{foreground_message, init_test_tracing, StubMessaging};

    fn test_config() -> MessagingConfig {
        MessagingConfig {
            site_key: "site-key-1".to_string(),
        }
    }

    #[tokio::test]
    async fn granted_permission_yields_backend_token() {
        init_test_tracing();
        let backend = StubMessaging::new();
        backend.set_token("issued-token-42").await;
        let manager = NotificationTokenManager::new(backend.clone(), &test_config());

        let token = manager.acquire_token().await.unwrap();
        assert_eq!(token.unwrap().as_str(), "issued-token-42");
        assert_eq!(manager.state(), OperationState::Success);
        assert_eq!(backend.last_site_key().await.as_deref(), Some("site-key-1"));
    }

    #[tokio::test]
    async fn denied_permission_is_unauthorized_not_an_error() {
        init_test_tracing();
        let backend = StubMessaging::new();
        backend.set_permission(PermissionStatus::Denied).await;
        let manager = NotificationTokenManager::new(backend.clone(), &test_config());

        let token = manager.acquire_token().await.unwrap();
        assert!(token.is_none());
        assert_eq!(manager.state(), OperationState::Unauthorized);
        // Explicit refusal short-circuits: the backend is never asked for a token
        assert_eq!(backend.token_fetches(), 0);
    }

    #[tokio::test]
    async fn dismissed_prompt_leaves_state_inactive() {
        init_test_tracing();
        let backend = StubMessaging::new();
        backend.set_permission(PermissionStatus::Default).await;
        let manager = NotificationTokenManager::new(backend, &test_config());

        let token = manager.acquire_token().await.unwrap();
        assert!(token.is_none());
        assert_eq!(manager.state(), OperationState::Inactive);
    }

    #[tokio::test]
    async fn unsupported_environment_fails_before_permission() {
        init_test_tracing();
        let backend = StubMessaging::unsupported();
        let manager = NotificationTokenManager::new(backend.clone(), &test_config());

        let err = manager.acquire_token().await.unwrap_err();
        assert!(matches!(err, MessagingError::UnsupportedEnvironment));
        assert_eq!(manager.state(), OperationState::Error);
        assert_eq!(backend.permission_requests(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_after_grant_is_terminal_error() {
        init_test_tracing();
        let backend = StubMessaging::new();
        backend.fail_token_fetch().await;
        let manager = NotificationTokenManager::new(backend, &test_config());

        let err = manager.acquire_token().await.unwrap_err();
        assert!(matches!(err, MessagingError::TokenFetch(_)));
        assert_eq!(manager.state(), OperationState::Error);
    }

    #[tokio::test]
    async fn permission_is_rerequested_on_every_call_by_default() {
        init_test_tracing();
        let backend = StubMessaging::new();
        let manager = NotificationTokenManager::new(backend.clone(), &test_config());

        manager.acquire_token().await.unwrap();
        manager.acquire_token().await.unwrap();

        assert_eq!(backend.permission_requests(), 2);
        assert_eq!(backend.token_fetches(), 2);
    }

    #[tokio::test]
    async fn injected_cache_skips_the_second_prompt() {
        init_test_tracing();
        let backend = StubMessaging::new();
        let manager = NotificationTokenManager::with_permission_cache(
            backend.clone(),
            &test_config(),
            InMemoryPermissionCache::new(),
        );

        manager.acquire_token().await.unwrap();
        manager.acquire_token().await.unwrap();

        // One prompt, but the token itself is still fetched fresh each time
        assert_eq!(backend.permission_requests(), 1);
        assert_eq!(backend.token_fetches(), 2);
    }

    #[tokio::test]
    async fn foreground_slot_keeps_most_recent_message() {
        init_test_tracing();
        let backend = StubMessaging::new();
        let manager = NotificationTokenManager::new(backend.clone(), &test_config());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.subscribe_foreground_messages(move |message| {
            if let Ok(mut titles) = sink.lock() {
                titles.push(message.title.unwrap_or_default());
            }
        });

        backend.push_foreground(foreground_message("m-1", "first")).await;
        backend.push_foreground(foreground_message("m-2", "second")).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let latest = manager.latest_message().unwrap();
        assert_eq!(latest.message_id.as_deref(), Some("m-2"));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["first".to_string(), "second".to_string()]
        );
    }
}
