//! Messaging backend trait
//!
//! The push-messaging transport (browser service worker, FCM, APNs, ...) is
//! host-environment specific and stays behind this trait; the manager owns
//! permission flow and state tracking above it.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::MessagingError;

use super::types::{MessagePayload, NotificationToken, PermissionStatus};

/// Operations the token manager consumes from a push-messaging backend
#[async_trait]
pub trait MessagingBackend: Send + Sync + 'static {
    /// Whether push messaging is available in the current environment
    async fn check_supported(&self) -> bool;

    /// Prompt the host for notification permission
    async fn request_permission(&self) -> Result<PermissionStatus, MessagingError>;

    /// Fetch a fresh messaging token using the configured site key
    async fn fetch_token(&self, site_key: &str) -> Result<NotificationToken, MessagingError>;

    /// Stream of messages delivered while the host is foregrounded
    fn foreground_messages(&self) -> BoxStream<'static, MessagePayload>;
}
