//! S3-compatible storage backend
//!
//! Wraps the AWS SDK for S3-compatible storage access (MinIO, R2, B2, AWS).

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::SdkError,
    operation::head_object::HeadObjectError,
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use tokio::sync::mpsc;

use crate::config::StorageConfig;
use crate::error::StorageError;

use super::backend::{ObjectStoreBackend, UploadEvent, UploadStream};
use super::types::{DownloadUrl, ObjectMetadata};

/// Part size for multipart uploads: 8MB
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3-compatible object store
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    url_ttl: Duration,
    public_base_url: Option<String>,
}

impl S3ObjectStore {
    /// Create a new S3 store from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "nube",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Probe the bucket so misconfiguration surfaces at startup
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self {
            client,
            bucket,
            url_ttl: Duration::from_secs(config.url_ttl_secs),
            public_base_url: config.public_base_url.clone(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStoreBackend for S3ObjectStore {
    fn begin_upload(&self, key: &str, payload: Bytes) -> UploadStream {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let url_ttl = self.url_ttl;
        let public_base_url = self.public_base_url.clone();

        let (tx, mut rx) = mpsc::channel::<UploadEvent>(16);

        tokio::spawn(async move {
            let result = run_upload(&client, &bucket, &key, payload, &tx).await;
            let terminal = match result {
                Ok(()) => {
                    match build_url(&client, &bucket, &key, url_ttl, public_base_url.as_deref())
                        .await
                    {
                        Ok(url) => UploadEvent::Completed { url },
                        Err(e) => UploadEvent::Failed {
                            cause: e.to_string(),
                        },
                    }
                }
                Err(cause) => UploadEvent::Failed { cause },
            };
            let _ = tx.send(terminal).await;
        });

        Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }

    async fn resolve_url(&self, key: &str) -> Result<DownloadUrl, StorageError> {
        // Presigning does not touch the store, so check existence first to get
        // not-found semantics
        self.metadata(key).await?;
        build_url(
            &self.client,
            &self.bucket,
            key,
            self.url_ttl,
            self.public_base_url.as_deref(),
        )
        .await
    }

    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| head_error(key, e))?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            last_modified: response
                .last_modified()
                .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
            content_type: response.content_type().map(|s| s.to_string()),
            etag: response.e_tag().map(|s| s.to_string()),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        // S3 DeleteObject succeeds on absent keys; head first to keep the
        // non-idempotent contract
        self.metadata(key).await?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!("failed to delete object {}: {}", key, e))
            })?;

        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };

        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .max_keys(1000);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                StorageError::Backend(format!("failed to list objects: {}", e))
            })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|s| s.to_string())),
            );

            if !response.is_truncated().unwrap_or(false) {
                break;
            }

            continuation_token = response.next_continuation_token().map(|s| s.to_string());
        }

        Ok(keys)
    }
}

/// Run the transfer, reporting a progress event per part
async fn run_upload(
    client: &Client,
    bucket: &str,
    key: &str,
    payload: Bytes,
    tx: &mpsc::Sender<UploadEvent>,
) -> Result<(), String> {
    let total = payload.len() as u64;
    let _ = tx
        .send(UploadEvent::Progress {
            bytes_transferred: 0,
            total_bytes: total,
        })
        .await;

    if payload.len() <= PART_SIZE {
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|e| format!("put failed: {}", e))?;

        let _ = tx
            .send(UploadEvent::Progress {
                bytes_transferred: total,
                total_bytes: total,
            })
            .await;
        return Ok(());
    }

    let create = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| format!("create multipart failed: {}", e))?;

    let upload_id = create
        .upload_id()
        .ok_or_else(|| "store returned no upload id".to_string())?
        .to_string();

    let mut completed_parts = Vec::new();
    let mut sent: u64 = 0;

    for (index, start) in (0..payload.len()).step_by(PART_SIZE).enumerate() {
        let end = std::cmp::min(start + PART_SIZE, payload.len());
        let part_number = (index + 1) as i32;

        let result = client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .body(ByteStream::from(payload.slice(start..end)))
            .send()
            .await;

        let part = match result {
            Ok(part) => part,
            Err(e) => {
                let _ = client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                return Err(format!("part {} failed: {}", part_number, e));
            }
        };

        completed_parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .e_tag(part.e_tag().unwrap_or_default())
                .build(),
        );

        sent += (end - start) as u64;
        let _ = tx
            .send(UploadEvent::Progress {
                bytes_transferred: sent,
                total_bytes: total,
            })
            .await;
    }

    client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(&upload_id)
        .multipart_upload(
            CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build(),
        )
        .send()
        .await
        .map_err(|e| format!("complete multipart failed: {}", e))?;

    Ok(())
}

/// Resolve a retrieval URL: public-base join for public buckets, presigned
/// GET otherwise
async fn build_url(
    client: &Client,
    bucket: &str,
    key: &str,
    ttl: Duration,
    public_base_url: Option<&str>,
) -> Result<DownloadUrl, StorageError> {
    if let Some(base) = public_base_url {
        return Ok(public_url(base, key));
    }

    let presigning = PresigningConfig::expires_in(ttl)
        .map_err(|e| StorageError::Backend(format!("invalid presign ttl: {}", e)))?;

    let presigned = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .presigned(presigning)
        .await
        .map_err(|e| StorageError::Backend(format!("failed to presign {}: {}", key, e)))?;

    Ok(DownloadUrl::new(presigned.uri().to_string()))
}

fn public_url(base: &str, key: &str) -> DownloadUrl {
    DownloadUrl::new(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        urlencoding::encode(key)
    ))
}

fn head_error(key: &str, e: SdkError<HeadObjectError>) -> StorageError {
    match &e {
        SdkError::ServiceError(context) if context.err().is_not_found() => {
            StorageError::NotFound(key.to_string())
        }
        _ => StorageError::Backend(format!("failed to head object {}: {}", key, e)),
    }
}
