//! Nube client core
//!
//! An application-facing abstraction over a remote blob store and a
//! push-notification token service: path-addressed object upload/download/
//! delete/list with resumable-upload progress, and permission-gated messaging
//! token acquisition with a foreground-message feed.
//!
//! Both components publish their lifecycle through an observable
//! [`OperationState`] cell so UI layers can react without polling. The cell
//! reflects the last applied transition across all in-flight calls; each call
//! additionally returns its own awaitable result.
//!
//! # Modules
//!
//! - `storage`: [`ObjectStoreGateway`] over an [`ObjectStoreBackend`], with a
//!   ready-made S3-compatible implementation
//! - `messaging`: [`NotificationTokenManager`] over a [`MessagingBackend`]
//! - `testing`: in-memory backends (behind the `test-util` feature)
//!
//! The transports underneath are opaque: no retries, no timeouts, no
//! encryption or authentication are applied here. Those belong to the caller
//! or the transport.

pub mod config;
pub mod error;
pub mod messaging;
pub mod state;
pub mod storage;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{Config, MessagingConfig, StorageConfig};
pub use error::{MessagingError, StorageError};
pub use messaging::{
    MessagePayload, MessagingBackend, NotificationToken, NotificationTokenManager,
    PermissionCache, PermissionStatus,
};
pub use state::OperationState;
pub use storage::{
    DownloadUrl, ObjectMetadata, ObjectStoreBackend, ObjectStoreGateway, S3ObjectStore,
    UploadJob, UploadProgress,
};
