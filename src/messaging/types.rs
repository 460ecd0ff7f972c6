//! Messaging data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque device messaging credential issued by the backend
///
/// Valid until the backend revokes or regenerates it. The manager never
/// persists one; each acquisition performs a fresh permission check + fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationToken(String);

impl NotificationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Outcome of a host permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    /// The user allowed notifications
    Granted,
    /// The user explicitly refused
    Denied,
    /// The user dismissed the prompt without deciding
    Default,
}

/// A push message delivered while the host application is foregrounded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Structured data payload, backend-defined
    #[serde(default)]
    pub data: serde_json::Value,

    /// When this client received the message
    pub received_at: DateTime<Utc>,
}
