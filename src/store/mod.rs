//! Persistence for integration records and mirrored tasks.
//!
//! Both stores keep their whole document in memory and rewrite the file on
//! every mutation, so a batch change lands in one atomic write.

pub mod document;
pub mod integrations;
pub mod tasks;

use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::model::integration::{Attention, Credentials, NewIntegration, ProviderIntegration};
use crate::model::task::{Task, TaskFields, UpsertResult};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait IntegrationStore: Send + Sync {
    fn add(&self, new: NewIntegration) -> StoreResult<ProviderIntegration>;

    /// Absent ids return `Ok(None)`.
    fn get_by_id(&self, id: u64) -> StoreResult<Option<ProviderIntegration>>;

    fn list(&self) -> StoreResult<Vec<ProviderIntegration>>;

    fn list_by_provider(&self, provider: &str) -> StoreResult<Vec<ProviderIntegration>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|i| i.provider.eq_ignore_ascii_case(provider))
            .collect())
    }

    fn list_active(&self) -> StoreResult<Vec<ProviderIntegration>> {
        Ok(self.list()?.into_iter().filter(|i| i.is_active).collect())
    }

    /// Replaces credentials and clears any attention flag.
    fn update_credentials(&self, id: u64, credentials: Credentials) -> StoreResult<()>;

    fn set_active(&self, id: u64, active: bool) -> StoreResult<()>;

    /// Returns false when the id did not exist.
    fn remove(&self, id: u64) -> StoreResult<bool>;

    /// Returns how many records changed.
    fn deactivate_all(&self) -> StoreResult<usize>;

    fn deactivate_by_provider(&self, provider: &str) -> StoreResult<usize>;

    fn get_due_for_sync(
        &self,
        max_age: Option<Duration>,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ProviderIntegration>> {
        let max_age = max_age.unwrap_or_else(crate::sync::scheduler::default_max_age);
        Ok(crate::sync::scheduler::select_due(&self.list_active()?, max_age, now))
    }

    fn get_recently_failed(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ProviderIntegration>> {
        Ok(crate::sync::scheduler::select_recently_failed(
            &self.list()?,
            window,
            now,
        ))
    }

    /// Stamps every id with the same timestamp in a single write and clears
    /// attention flags. Unknown ids are ignored. Returns how many were stamped.
    fn update_last_sync_bulk(&self, ids: &[u64], as_of: DateTime<Utc>) -> StoreResult<usize>;

    fn record_failure(
        &self,
        id: u64,
        at: DateTime<Utc>,
        reason: &str,
        attention: Option<Attention>,
    ) -> StoreResult<()>;
}

pub trait TaskStore: Send + Sync {
    fn find_by_external_reference(
        &self,
        provider: &str,
        external_id: &str,
        integration_id: u64,
    ) -> StoreResult<Option<Task>>;

    /// Creates or updates the task keyed by (provider, external id) within
    /// `fields.integration_id`. Writes nothing when every field already matches.
    fn upsert_by_external_reference(
        &self,
        provider: &str,
        external_id: &str,
        fields: TaskFields,
    ) -> StoreResult<UpsertResult>;

    fn list(&self) -> StoreResult<Vec<Task>>;
}
