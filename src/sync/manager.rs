//! Runs sync passes: picks due integrations, calls their provider adapter,
//! mirrors the work items into the task store and records the outcome.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::cancel::CancelSignal;
use super::guard::{InFlight, InFlightGuard};
use super::mapping::map_work_item;
use super::scheduler::select_due;
use crate::config::SyncSettings;
use crate::error::{ProviderError, ProviderErrorKind, StoreError, SyncError};
use crate::model::integration::{Attention, Credentials, NewIntegration, ProviderIntegration};
use crate::model::outcome::{CycleReport, SyncOutcome, SyncStats};
use crate::model::task::UpsertChange;
use crate::model::work_item::RemoteWorkItem;
use crate::providers::{ProviderAdapter, ProviderRegistry};
use crate::store::{IntegrationStore, TaskStore};

/// Timeouts and limits the manager enforces.
#[derive(Debug, Clone)]
pub struct SyncLimits {
    pub max_age: chrono::Duration,
    pub failure_window: chrono::Duration,
    pub connection_timeout: Duration,
    pub fetch_timeout: Duration,
    pub per_provider_concurrency: usize,
}

impl From<&SyncSettings> for SyncLimits {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_age: settings.max_age(),
            failure_window: settings.failure_window(),
            connection_timeout: settings.connection_timeout(),
            fetch_timeout: settings.fetch_timeout(),
            per_provider_concurrency: settings.concurrency(),
        }
    }
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

enum Bounded<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

/// Races `fut` against the timeout and the cancel signal. Dropping the future
/// aborts the underlying request.
async fn bounded<F: Future>(cancel: &CancelSignal, limit: Duration, fut: F) -> Bounded<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Bounded::Cancelled,
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(value) => Bounded::Done(value),
            Err(_) => Bounded::TimedOut,
        },
    }
}

pub struct IntegrationManager {
    integrations: Arc<dyn IntegrationStore>,
    tasks: Arc<dyn TaskStore>,
    registry: ProviderRegistry,
    limits: SyncLimits,
    in_flight: InFlight,
    provider_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl IntegrationManager {
    pub fn new(
        integrations: Arc<dyn IntegrationStore>,
        tasks: Arc<dyn TaskStore>,
        registry: ProviderRegistry,
        limits: SyncLimits,
    ) -> Self {
        Self {
            integrations,
            tasks,
            registry,
            limits,
            in_flight: InFlight::default(),
            provider_slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn integrations(&self) -> &dyn IntegrationStore {
        self.integrations.as_ref()
    }

    pub fn tasks(&self) -> &dyn TaskStore {
        self.tasks.as_ref()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Validates the bundle and checks it against the provider. Rejected
    /// credentials come back as an auth `ProviderError`.
    pub async fn test_credentials(
        &self,
        provider: &str,
        credentials: &Credentials,
    ) -> Result<(), SyncError> {
        credentials.validate()?;
        let adapter = self.registry.resolve(provider)?;
        match tokio::time::timeout(
            self.limits.connection_timeout,
            adapter.test_connection(credentials),
        )
        .await
        {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ProviderError::auth("credentials rejected by provider").into()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ProviderError::network("timeout").into()),
        }
    }

    /// Persists a new integration, but only after its connection test passes.
    pub async fn add_integration(&self, new: NewIntegration) -> Result<ProviderIntegration, SyncError> {
        new.validate()?;
        self.test_credentials(&new.provider, &new.credentials).await?;
        let adapter = self.registry.resolve(&new.provider)?;
        let new = NewIntegration {
            provider: adapter.name().to_string(),
            ..new
        };
        let integration = self.integrations.add(new)?;
        info!(
            integration_id = integration.id,
            provider = %integration.provider,
            "Integration added"
        );
        Ok(integration)
    }

    /// Replaces credentials after testing them. Clears any attention flag.
    pub async fn update_credentials(&self, id: u64, credentials: Credentials) -> Result<(), SyncError> {
        let integration = self
            .integrations
            .get_by_id(id)?
            .ok_or(StoreError::NotFound(id))?;
        self.test_credentials(&integration.provider, &credentials)
            .await?;
        self.integrations.update_credentials(id, credentials)?;
        Ok(())
    }

    pub async fn fetch_projects(&self, id: u64) -> Result<Vec<String>, SyncError> {
        let integration = self
            .integrations
            .get_by_id(id)?
            .ok_or(StoreError::NotFound(id))?;
        let adapter = self.registry.resolve(&integration.provider)?;
        match tokio::time::timeout(
            self.limits.fetch_timeout,
            adapter.fetch_projects(&integration.credentials),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProviderError::network("timeout").into()),
        }
    }

    pub fn recently_failed(
        &self,
        window: Option<chrono::Duration>,
    ) -> Result<Vec<ProviderIntegration>, SyncError> {
        let window = window.unwrap_or(self.limits.failure_window);
        Ok(self.integrations.get_recently_failed(window, Utc::now())?)
    }

    /// Syncs a single integration and stamps its `last_sync_at` on success.
    pub async fn sync_one(
        &self,
        integration: &ProviderIntegration,
        cancel: &CancelSignal,
    ) -> SyncOutcome {
        let _claim = match self.claim(integration.id) {
            Ok(claim) => claim,
            Err(busy) => return busy,
        };
        let as_of = Utc::now();
        let outcome = self.attempt(integration, cancel).await;
        if outcome.is_success() {
            if let Err(e) = self
                .integrations
                .update_last_sync_bulk(&[integration.id], as_of)
            {
                return SyncOutcome::Failed(format!("storage error: {e}"));
            }
        }
        outcome
    }

    /// Like `sync_one`, but an integration that is already syncing is an error.
    pub async fn sync_by_id(&self, id: u64, cancel: &CancelSignal) -> Result<SyncOutcome, SyncError> {
        if self.in_flight.is_syncing(id) {
            return Err(SyncError::AlreadySyncing(id));
        }
        let integration = self
            .integrations
            .get_by_id(id)?
            .ok_or(StoreError::NotFound(id))?;
        Ok(self.sync_one(&integration, cancel).await)
    }

    pub async fn sync_due(
        &self,
        max_age: Option<chrono::Duration>,
        cancel: &CancelSignal,
    ) -> Result<CycleReport, SyncError> {
        self.run_sync_cycle(None, max_age, cancel).await
    }

    /// One cycle over every due integration, optionally limited to one
    /// provider. All successes share the as-of time taken before the cycle
    /// and are stamped in one store write. Only store failures abort.
    pub async fn run_sync_cycle(
        &self,
        provider_filter: Option<&str>,
        max_age: Option<chrono::Duration>,
        cancel: &CancelSignal,
    ) -> Result<CycleReport, SyncError> {
        let as_of = Utc::now();
        let max_age = max_age.unwrap_or(self.limits.max_age);

        let due = match provider_filter {
            Some(provider) => select_due(
                &self.integrations.list_by_provider(provider)?,
                max_age,
                as_of,
            ),
            None => self.integrations.get_due_for_sync(Some(max_age), as_of)?,
        };
        info!(due = due.len(), provider = ?provider_filter, "Starting sync cycle");

        // claims stay held until the bulk stamp below has landed
        let outcomes = join_all(due.iter().map(|integration| async move {
            match self.claim(integration.id) {
                Ok(claim) => (integration, self.attempt(integration, cancel).await, Some(claim)),
                Err(busy) => (integration, busy, None),
            }
        }))
        .await;

        let succeeded: Vec<u64> = outcomes
            .iter()
            .filter(|(_, outcome, _)| outcome.is_success())
            .map(|(integration, _, _)| integration.id)
            .collect();
        if !succeeded.is_empty() {
            self.integrations.update_last_sync_bulk(&succeeded, as_of)?;
        }

        let mut report = CycleReport::default();
        for (integration, outcome, _claim) in outcomes {
            report.insert(integration.id, &integration.provider, outcome);
        }
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Sync cycle finished"
        );
        Ok(report)
    }

    fn claim(&self, id: u64) -> Result<InFlightGuard, SyncOutcome> {
        self.in_flight.try_claim(id).ok_or_else(|| {
            debug!(integration_id = id, "Sync already in progress");
            SyncOutcome::Skipped("sync already in progress".into())
        })
    }

    fn slots_for(&self, provider: &str) -> Arc<Semaphore> {
        let mut slots = self
            .provider_slots
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        slots
            .entry(provider.to_ascii_lowercase())
            .or_insert_with(|| Arc::new(Semaphore::new(self.limits.per_provider_concurrency.max(1))))
            .clone()
    }

    /// Everything short of stamping `last_sync_at`. The caller holds the
    /// in-flight claim. Never errors: every failure becomes an outcome, and
    /// failures are recorded on the record.
    async fn attempt(&self, integration: &ProviderIntegration, cancel: &CancelSignal) -> SyncOutcome {
        if integration.attention == Some(Attention::InvalidConfiguration) {
            return SyncOutcome::Skipped("invalid configuration, update credentials first".into());
        }
        if let Err(e) = integration.credentials.validate() {
            return self.fail(integration, e.to_string(), Some(Attention::InvalidConfiguration));
        }
        let adapter = match self.registry.resolve(&integration.provider) {
            Ok(adapter) => adapter,
            Err(_) => {
                return self.fail(
                    integration,
                    "unsupported provider".into(),
                    Some(Attention::InvalidConfiguration),
                )
            }
        };

        let slots = self.slots_for(adapter.name());
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SyncOutcome::Skipped("cancelled".into()),
            permit = slots.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return SyncOutcome::Failed("provider limiter closed".into()),
            },
        };

        match self.fetch(integration, adapter.as_ref(), cancel).await {
            Ok(items) => {
                if cancel.is_cancelled() {
                    return SyncOutcome::Skipped("cancelled".into());
                }
                self.apply(integration, adapter.name(), &items)
            }
            Err(outcome) => outcome,
        }
    }

    /// Connection test then fetch, each under its own timeout.
    async fn fetch(
        &self,
        integration: &ProviderIntegration,
        adapter: &dyn ProviderAdapter,
        cancel: &CancelSignal,
    ) -> Result<Vec<RemoteWorkItem>, SyncOutcome> {
        let credentials = &integration.credentials;

        match bounded(
            cancel,
            self.limits.connection_timeout,
            adapter.test_connection(credentials),
        )
        .await
        {
            Bounded::Done(Ok(true)) => {}
            Bounded::Done(Ok(false)) => {
                return Err(self.fail(
                    integration,
                    "credentials rejected by provider".into(),
                    Some(Attention::AuthenticationFailed),
                ))
            }
            Bounded::Done(Err(e)) => return Err(self.provider_failure(integration, e)),
            Bounded::TimedOut => return Err(self.fail(integration, "timeout".into(), None)),
            Bounded::Cancelled => return Err(SyncOutcome::Skipped("cancelled".into())),
        }

        match bounded(
            cancel,
            self.limits.fetch_timeout,
            adapter.fetch_work_items(credentials, integration.project_name.as_deref()),
        )
        .await
        {
            Bounded::Done(Ok(items)) => Ok(items),
            Bounded::Done(Err(e)) => Err(self.provider_failure(integration, e)),
            Bounded::TimedOut => Err(self.fail(integration, "timeout".into(), None)),
            Bounded::Cancelled => Err(SyncOutcome::Skipped("cancelled".into())),
        }
    }

    /// Upserts every mappable item. A malformed item is logged and skipped.
    fn apply(
        &self,
        integration: &ProviderIntegration,
        provider: &str,
        items: &[RemoteWorkItem],
    ) -> SyncOutcome {
        let mut stats = SyncStats::default();
        for item in items {
            let existing = match self
                .tasks
                .find_by_external_reference(provider, &item.external_id, integration.id)
            {
                Ok(existing) => existing,
                Err(e) => return self.fail(integration, format!("storage error: {e}"), None),
            };
            let fields = match map_work_item(item, existing.as_ref(), integration.id) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(integration_id = integration.id, error = %e, "Skipping work item");
                    stats.skipped += 1;
                    continue;
                }
            };
            match self
                .tasks
                .upsert_by_external_reference(provider, &item.external_id, fields)
            {
                Ok(result) => match result.change {
                    UpsertChange::Created => {
                        debug!(task_id = result.task_id, external_id = %item.external_id, "Task created");
                        stats.created += 1
                    }
                    UpsertChange::Updated => stats.updated += 1,
                    UpsertChange::Unchanged => stats.unchanged += 1,
                },
                Err(e) => return self.fail(integration, format!("storage error: {e}"), None),
            }
        }
        info!(
            integration_id = integration.id,
            provider,
            created = stats.created,
            updated = stats.updated,
            unchanged = stats.unchanged,
            skipped = stats.skipped,
            "Integration synced"
        );
        SyncOutcome::Succeeded(stats)
    }

    fn provider_failure(&self, integration: &ProviderIntegration, err: ProviderError) -> SyncOutcome {
        let attention = match err.kind {
            ProviderErrorKind::Auth => Some(Attention::AuthenticationFailed),
            ProviderErrorKind::RateLimited => {
                info!(
                    integration_id = integration.id,
                    "Rate limited, backing off until the next cycle"
                );
                None
            }
            ProviderErrorKind::Network | ProviderErrorKind::Unknown => None,
        };
        self.fail(integration, err.to_string(), attention)
    }

    fn fail(
        &self,
        integration: &ProviderIntegration,
        reason: String,
        attention: Option<Attention>,
    ) -> SyncOutcome {
        warn!(
            integration_id = integration.id,
            provider = %integration.provider,
            reason = %reason,
            "Sync failed"
        );
        let now: DateTime<Utc> = Utc::now();
        if let Err(e) = self
            .integrations
            .record_failure(integration.id, now, &reason, attention)
        {
            warn!(integration_id = integration.id, error = %e, "Failed to record sync failure");
        }
        SyncOutcome::Failed(reason)
    }
}
