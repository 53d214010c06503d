use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ProviderAdapter, ProviderRegistry};
use crate::error::{ProviderError, SyncError};
use crate::model::integration::Credentials;
use crate::model::work_item::RemoteWorkItem;

/// Scriptable adapter that records calls. Shared with the sync tests.
pub struct MockAdapter {
    provider_name: String,
    pub items: Arc<Mutex<Vec<RemoteWorkItem>>>,
    pub connection_ok: bool,
    pub connection_error: Option<ProviderError>,
    pub fetch_error: Option<ProviderError>,
    pub delay: Option<Duration>,
    pub connection_delay: Option<Duration>,
    pub test_calls: Arc<AtomicUsize>,
    pub fetch_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            provider_name: name.to_string(),
            items: Arc::new(Mutex::new(Vec::new())),
            connection_ok: true,
            connection_error: None,
            fetch_error: None,
            delay: None,
            connection_delay: None,
            test_calls: Arc::new(AtomicUsize::new(0)),
            fetch_calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_items(self, items: Vec<RemoteWorkItem>) -> Self {
        *self.items.lock().unwrap() = items;
        self
    }

    pub fn rejecting_credentials(mut self) -> Self {
        self.connection_ok = false;
        self
    }

    pub fn with_connection_error(mut self, err: ProviderError) -> Self {
        self.connection_error = Some(err);
        self
    }

    pub fn with_fetch_error(mut self, err: ProviderError) -> Self {
        self.fetch_error = Some(err);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Slows down `test_connection` only.
    pub fn with_connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = Some(delay);
        self
    }

    async fn pause(delay: Option<Duration>) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

pub fn item(external_id: &str, title: &str, state: &str) -> RemoteWorkItem {
    RemoteWorkItem {
        external_id: external_id.to_string(),
        title: title.to_string(),
        description: None,
        state: state.to_string(),
        url: Some(format!("https://example.test/items/{external_id}")),
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn test_connection(&self, _credentials: &Credentials) -> Result<bool, ProviderError> {
        self.test_calls.fetch_add(1, Ordering::SeqCst);
        Self::pause(self.connection_delay).await;
        if let Some(err) = &self.connection_error {
            return Err(err.clone());
        }
        Ok(self.connection_ok)
    }

    async fn fetch_work_items(
        &self,
        _credentials: &Credentials,
        _project: Option<&str>,
    ) -> Result<Vec<RemoteWorkItem>, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self::pause(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = &self.fetch_error {
            return Err(err.clone());
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn fetch_projects(&self, _credentials: &Credentials) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["Web".into(), "Api".into()])
    }
}

fn creds() -> Credentials {
    Credentials::new("https://example.test/acme", "token")
}

#[test]
fn registry_resolves_case_insensitively() {
    let registry = ProviderRegistry::new()
        .with(Arc::new(MockAdapter::new("AzureDevOps")))
        .with(Arc::new(MockAdapter::new("GitHub")));

    assert_eq!(registry.resolve("github").unwrap().name(), "GitHub");
    assert_eq!(registry.resolve("AZUREDEVOPS").unwrap().name(), "AzureDevOps");
    assert_eq!(registry.names(), vec!["AzureDevOps", "GitHub"]);
}

#[test]
fn registry_rejects_unknown_tag() {
    let registry = ProviderRegistry::new().with(Arc::new(MockAdapter::new("GitHub")));
    match registry.resolve("Jira") {
        Err(SyncError::UnsupportedProvider(tag)) => assert_eq!(tag, "Jira"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("Jira should not resolve"),
    }
}

#[test]
fn default_registry_has_both_providers() {
    let registry = super::create_registry();
    assert_eq!(registry.names(), vec!["AzureDevOps", "GitHub"]);
}

#[tokio::test]
async fn mock_reports_rejected_credentials() {
    let adapter = MockAdapter::new("GitHub").rejecting_credentials();
    assert!(!adapter.test_connection(&creds()).await.unwrap());
    assert_eq!(adapter.test_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn mock_connection_errors_propagate() {
    let adapter = MockAdapter::new("GitHub").with_connection_error(ProviderError::network("dns"));
    let err = adapter.test_connection(&creds()).await.unwrap_err();
    assert_eq!(err.kind, crate::error::ProviderErrorKind::Network);
}

#[tokio::test]
async fn mock_fetch_errors_propagate() {
    let adapter = MockAdapter::new("GitHub").with_fetch_error(ProviderError::network("reset"));
    let err = adapter.fetch_work_items(&creds(), None).await.unwrap_err();
    assert_eq!(err.to_string(), "network error: reset");
}

#[tokio::test]
async fn mock_returns_configured_items() {
    let adapter = MockAdapter::new("GitHub").with_items(vec![item("1", "First", "open")]);
    let items = adapter.fetch_work_items(&creds(), Some("web")).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "First");
    assert_eq!(adapter.fetch_projects(&creds()).await.unwrap(), vec!["Web", "Api"]);
}
