use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope stored for single ephemeral tokens (reset, verification, 2FA).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEnvelope {
    pub token_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    /// Free-form, feature-specific data.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One login session's refresh token, kept in a bounded per-user collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRecord {
    pub token_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl RefreshTokenRecord {
    pub fn new(token_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            last_active_at: None,
            user_agent: None,
            ip_address: None,
        }
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active_at.unwrap_or(self.created_at)
    }
}

/// A device that may skip the second factor until its record expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedDevice {
    /// Client fingerprint; unique within the user's devices.
    pub device_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl TrustedDevice {
    pub fn new(device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            last_active_at: None,
            name: None,
            user_agent: None,
        }
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active_at.unwrap_or(self.created_at)
    }
}
