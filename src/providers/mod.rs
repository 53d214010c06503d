pub mod azure_devops;
pub mod github;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProviderError, SyncError};
use crate::model::integration::Credentials;
use crate::model::work_item::RemoteWorkItem;

/// Per-request ceiling applied by the HTTP client itself. The sync manager
/// enforces its own, usually tighter, timeouts on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Tag stored on integrations, e.g. "GitHub".
    fn name(&self) -> &str;

    /// Ok(false) when the provider is reachable but rejects the credentials.
    /// Must not change any state.
    async fn test_connection(&self, credentials: &Credentials) -> Result<bool, ProviderError>;

    /// Work items visible to the credentials. Ordering is provider-defined.
    async fn fetch_work_items(
        &self,
        credentials: &Credentials,
        project: Option<&str>,
    ) -> Result<Vec<RemoteWorkItem>, ProviderError>;

    /// Project names, for interactive configuration.
    async fn fetch_projects(&self, credentials: &Credentials) -> Result<Vec<String>, ProviderError>;
}

/// Provider tag to adapter, resolved by explicit lookup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters
            .insert(adapter.name().to_ascii_lowercase(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn resolve(&self, provider: &str) -> Result<Arc<dyn ProviderAdapter>, SyncError> {
        self.adapters
            .get(&provider.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| SyncError::UnsupportedProvider(provider.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.values().map(|a| a.name().to_string()).collect();
        names.sort();
        names
    }
}

pub fn create_registry() -> ProviderRegistry {
    let client = http_client();
    ProviderRegistry::new()
        .with(Arc::new(azure_devops::AzureDevOpsAdapter::new(client.clone())))
        .with(Arc::new(github::GitHubAdapter::new(client)))
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("worklog/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Turns a non-success response into a typed error, keeping the body for context.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status, &body))
}

#[cfg(test)]
pub mod tests;
