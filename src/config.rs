//! Configuration management for the Nube client core

use anyhow::Context;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub messaging: MessagingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Base URL for public buckets. When set, retrieval URLs are joined onto
    /// it instead of presigned.
    pub public_base_url: Option<String>,
    /// Lifetime of presigned retrieval URLs, in seconds.
    pub url_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// Site key handed to the messaging backend when fetching a token.
    pub site_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig {
                endpoint: "http://localhost:9000".to_string(),
                bucket: "nube".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
                public_base_url: None,
                url_ttl_secs: 3600,
            },
            messaging: MessagingConfig {
                site_key: String::new(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            storage: StorageConfig {
                endpoint: env::var("S3_ENDPOINT").context("S3_ENDPOINT not set")?,
                bucket: env::var("S3_BUCKET").context("S3_BUCKET not set")?,
                access_key: env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY not set")?,
                secret_key: env::var("S3_SECRET_KEY").context("S3_SECRET_KEY not set")?,
                region: env::var("S3_REGION").ok(),
                public_base_url: env::var("S3_PUBLIC_BASE_URL").ok(),
                url_ttl_secs: env::var("S3_URL_TTL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600),
            },
            messaging: MessagingConfig {
                site_key: env::var("PUSH_SITE_KEY").unwrap_or_default(),
            },
        })
    }
}
