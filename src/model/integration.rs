use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SyncError;

/// Why an integration needs the operator to look at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attention {
    /// Credentials are missing or malformed. Not retried until updated.
    InvalidConfiguration,
    /// The provider rejected the credentials. Still retried on due cycles.
    AuthenticationFailed,
}

impl fmt::Display for Attention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attention::InvalidConfiguration => f.write_str("invalid configuration"),
            Attention::AuthenticationFailed => f.write_str("authentication failed"),
        }
    }
}

/// Credential bundle handed to provider adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub organization_url: String,
    pub personal_access_token: String,
}

impl Credentials {
    pub fn new(organization_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            organization_url: organization_url.into(),
            personal_access_token: token.into(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.organization_url.trim().is_empty() {
            return Err(SyncError::Configuration("organization URL is empty".into()));
        }
        if !self.organization_url.starts_with("http://")
            && !self.organization_url.starts_with("https://")
        {
            return Err(SyncError::Configuration(format!(
                "organization URL must start with http:// or https://, got {:?}",
                self.organization_url
            )));
        }
        if self.personal_access_token.trim().is_empty() {
            return Err(SyncError::Configuration("personal access token is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIntegration {
    pub id: u64,
    pub provider: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub is_active: bool,
    /// `None` means the integration has never synced successfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention: Option<Attention>,
    pub created_at: DateTime<Utc>,
}

impl ProviderIntegration {
    /// True when the most recent attempt failed and nothing succeeded since.
    pub fn failed_since_last_sync(&self) -> bool {
        match (self.last_failure_at, self.last_sync_at) {
            (Some(failed), Some(synced)) => failed > synced,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Input for creating an integration.
#[derive(Debug, Clone)]
pub struct NewIntegration {
    pub provider: String,
    pub credentials: Credentials,
    pub project_name: Option<String>,
}

impl NewIntegration {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.provider.trim().is_empty() {
            return Err(SyncError::Configuration("provider is empty".into()));
        }
        self.credentials.validate()
    }
}
