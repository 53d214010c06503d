use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::document::JsonDocument;
use super::{IntegrationStore, StoreResult};
use crate::error::StoreError;
use crate::model::integration::{Attention, Credentials, NewIntegration, ProviderIntegration};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IntegrationData {
    next_id: u64,
    integrations: BTreeMap<u64, ProviderIntegration>,
}

pub struct JsonIntegrationStore {
    doc: JsonDocument<IntegrationData>,
}

impl JsonIntegrationStore {
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        Ok(Self {
            doc: JsonDocument::open(data_dir.join("integrations.json"))?,
        })
    }

    /// Reads `integrations.json` but keeps every change in memory.
    pub fn open_detached(data_dir: &Path) -> StoreResult<Self> {
        Ok(Self {
            doc: JsonDocument::detached(data_dir.join("integrations.json"))?,
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            doc: JsonDocument::in_memory(),
        }
    }

    fn modify(&self, id: u64, f: impl FnOnce(&mut ProviderIntegration)) -> StoreResult<()> {
        self.doc.update(|data| {
            let integration = data
                .integrations
                .get_mut(&id)
                .ok_or(StoreError::NotFound(id))?;
            f(integration);
            Ok(((), true))
        })
    }

    fn deactivate_where(&self, pred: impl Fn(&ProviderIntegration) -> bool) -> StoreResult<usize> {
        self.doc.update(|data| {
            let mut changed = 0;
            for integration in data.integrations.values_mut() {
                if integration.is_active && pred(integration) {
                    integration.is_active = false;
                    changed += 1;
                }
            }
            Ok((changed, changed > 0))
        })
    }
}

impl IntegrationStore for JsonIntegrationStore {
    fn add(&self, new: NewIntegration) -> StoreResult<ProviderIntegration> {
        self.doc.update(|data| {
            data.next_id += 1;
            let integration = ProviderIntegration {
                id: data.next_id,
                provider: new.provider,
                credentials: new.credentials,
                project_name: new.project_name.filter(|p| !p.trim().is_empty()),
                is_active: true,
                last_sync_at: None,
                last_failure_at: None,
                last_failure_reason: None,
                attention: None,
                created_at: Utc::now(),
            };
            data.integrations.insert(integration.id, integration.clone());
            Ok((integration, true))
        })
    }

    fn get_by_id(&self, id: u64) -> StoreResult<Option<ProviderIntegration>> {
        self.doc.read(|data| data.integrations.get(&id).cloned())
    }

    fn list(&self) -> StoreResult<Vec<ProviderIntegration>> {
        self.doc.read(|data| data.integrations.values().cloned().collect())
    }

    fn update_credentials(&self, id: u64, credentials: Credentials) -> StoreResult<()> {
        self.modify(id, |integration| {
            integration.credentials = credentials;
            integration.attention = None;
        })
    }

    fn set_active(&self, id: u64, active: bool) -> StoreResult<()> {
        self.modify(id, |integration| integration.is_active = active)
    }

    fn remove(&self, id: u64) -> StoreResult<bool> {
        self.doc.update(|data| {
            let removed = data.integrations.remove(&id).is_some();
            Ok((removed, removed))
        })
    }

    fn deactivate_all(&self) -> StoreResult<usize> {
        self.deactivate_where(|_| true)
    }

    fn deactivate_by_provider(&self, provider: &str) -> StoreResult<usize> {
        self.deactivate_where(|i| i.provider.eq_ignore_ascii_case(provider))
    }

    fn update_last_sync_bulk(&self, ids: &[u64], as_of: DateTime<Utc>) -> StoreResult<usize> {
        let ids: HashSet<u64> = ids.iter().copied().collect();
        self.doc.update(|data| {
            let mut stamped = 0;
            for id in &ids {
                if let Some(integration) = data.integrations.get_mut(id) {
                    integration.last_sync_at = Some(as_of);
                    integration.attention = None;
                    stamped += 1;
                }
            }
            Ok((stamped, stamped > 0))
        })
    }

    fn record_failure(
        &self,
        id: u64,
        at: DateTime<Utc>,
        reason: &str,
        attention: Option<Attention>,
    ) -> StoreResult<()> {
        self.modify(id, |integration| {
            integration.last_failure_at = Some(at);
            integration.last_failure_reason = Some(reason.to_string());
            if attention.is_some() {
                integration.attention = attention;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_integration(provider: &str) -> NewIntegration {
        NewIntegration {
            provider: provider.into(),
            credentials: Credentials::new("https://dev.azure.com/acme", "pat"),
            project_name: None,
        }
    }

    #[test]
    fn add_assigns_increasing_ids_and_activates() {
        let store = JsonIntegrationStore::in_memory();
        let a = store.add(new_integration("AzureDevOps")).unwrap();
        let b = store.add(new_integration("GitHub")).unwrap();
        assert!(b.id > a.id);
        assert!(a.is_active);
        assert_eq!(a.last_sync_at, None);
    }

    #[test]
    fn missing_id_is_none_not_error() {
        let store = JsonIntegrationStore::in_memory();
        assert_eq!(store.get_by_id(42).unwrap(), None);
        assert!(!store.remove(42).unwrap());
    }

    #[test]
    fn set_active_on_missing_id_is_not_found() {
        let store = JsonIntegrationStore::in_memory();
        assert!(matches!(
            store.set_active(3, false),
            Err(StoreError::NotFound(3))
        ));
    }

    #[test]
    fn deactivate_by_provider_keeps_records() {
        let store = JsonIntegrationStore::in_memory();
        let az = store.add(new_integration("AzureDevOps")).unwrap();
        let gh = store.add(new_integration("GitHub")).unwrap();

        assert_eq!(store.deactivate_by_provider("azuredevops").unwrap(), 1);
        assert!(!store.get_by_id(az.id).unwrap().unwrap().is_active);
        assert!(store.get_by_id(gh.id).unwrap().unwrap().is_active);
        assert_eq!(store.list().unwrap().len(), 2);

        assert_eq!(store.deactivate_all().unwrap(), 1);
        assert!(store.list_active().unwrap().is_empty());
    }

    #[test]
    fn bulk_update_stamps_one_timestamp() {
        let store = JsonIntegrationStore::in_memory();
        let a = store.add(new_integration("GitHub")).unwrap();
        let b = store.add(new_integration("GitHub")).unwrap();
        let c = store.add(new_integration("GitHub")).unwrap();

        let as_of = Utc::now();
        assert_eq!(store.update_last_sync_bulk(&[a.id, b.id, 999], as_of).unwrap(), 2);

        assert_eq!(store.get_by_id(a.id).unwrap().unwrap().last_sync_at, Some(as_of));
        assert_eq!(store.get_by_id(b.id).unwrap().unwrap().last_sync_at, Some(as_of));
        assert_eq!(store.get_by_id(c.id).unwrap().unwrap().last_sync_at, None);
    }

    #[test]
    fn due_for_sync_uses_default_max_age() {
        let store = JsonIntegrationStore::in_memory();
        let fresh = store.add(new_integration("GitHub")).unwrap();
        let stale = store.add(new_integration("GitHub")).unwrap();
        let never = store.add(new_integration("GitHub")).unwrap();

        let now = Utc::now();
        store
            .update_last_sync_bulk(&[fresh.id], now - Duration::minutes(5))
            .unwrap();
        store
            .update_last_sync_bulk(&[stale.id], now - Duration::hours(2))
            .unwrap();

        let due: Vec<u64> = store
            .get_due_for_sync(None, now)
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(due, vec![never.id, stale.id]);
    }

    #[test]
    fn failure_then_success_clears_attention() {
        let store = JsonIntegrationStore::in_memory();
        let a = store.add(new_integration("GitHub")).unwrap();
        let now = Utc::now();

        store
            .record_failure(a.id, now, "auth error: bad token", Some(Attention::AuthenticationFailed))
            .unwrap();
        let failed = store.get_recently_failed(Duration::hours(1), now).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attention, Some(Attention::AuthenticationFailed));
        assert!(failed[0].is_active);

        store
            .update_last_sync_bulk(&[a.id], now + Duration::seconds(1))
            .unwrap();
        let record = store.get_by_id(a.id).unwrap().unwrap();
        assert_eq!(record.attention, None);
        assert!(store
            .get_recently_failed(Duration::hours(1), now)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn update_credentials_clears_configuration_flag() {
        let store = JsonIntegrationStore::in_memory();
        let a = store.add(new_integration("GitHub")).unwrap();
        store
            .record_failure(a.id, Utc::now(), "bad url", Some(Attention::InvalidConfiguration))
            .unwrap();
        store
            .update_credentials(a.id, Credentials::new("https://github.com/acme", "new"))
            .unwrap();
        let record = store.get_by_id(a.id).unwrap().unwrap();
        assert_eq!(record.attention, None);
        assert_eq!(record.credentials.personal_access_token, "new");
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = JsonIntegrationStore::open(dir.path()).unwrap();
            let a = store.add(new_integration("AzureDevOps")).unwrap();
            store.update_last_sync_bulk(&[a.id], Utc::now()).unwrap();
            a.id
        };

        let store = JsonIntegrationStore::open(dir.path()).unwrap();
        let record = store.get_by_id(id).unwrap().unwrap();
        assert!(record.last_sync_at.is_some());
        let next = store.add(new_integration("GitHub")).unwrap();
        assert!(next.id > id);
    }

    #[test]
    fn detached_store_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let id = JsonIntegrationStore::open(dir.path())
            .unwrap()
            .add(new_integration("GitHub"))
            .unwrap()
            .id;

        let detached = JsonIntegrationStore::open_detached(dir.path()).unwrap();
        detached.update_last_sync_bulk(&[id], Utc::now()).unwrap();
        assert!(detached.get_by_id(id).unwrap().unwrap().last_sync_at.is_some());

        let reopened = JsonIntegrationStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_by_id(id).unwrap().unwrap().last_sync_at, None);
    }
}
