//! Storage module: gateway over S3-compatible and custom blob stores

mod backend;
mod gateway;
mod s3;
mod types;

pub use backend::{ObjectStoreBackend, UploadEvent, UploadStream};
pub use gateway::{ObjectStoreGateway, UploadJob};
pub use s3::S3ObjectStore;
pub use types::{DownloadUrl, ObjectMetadata, UploadProgress};
