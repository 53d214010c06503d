use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::document::JsonDocument;
use super::{StoreResult, TaskStore};
use crate::model::task::{Task, TaskFields, UpsertChange, UpsertResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TaskData {
    next_id: u64,
    tasks: BTreeMap<u64, Task>,
}

impl TaskData {
    fn find_mut(&mut self, provider: &str, external_id: &str, integration_id: u64) -> Option<&mut Task> {
        self.tasks
            .values_mut()
            .find(|t| t.is_mirror_of(provider, external_id, integration_id))
    }
}

pub struct JsonTaskStore {
    doc: JsonDocument<TaskData>,
}

impl JsonTaskStore {
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        Ok(Self {
            doc: JsonDocument::open(data_dir.join("tasks.json"))?,
        })
    }

    /// Reads `tasks.json` but keeps every change in memory.
    pub fn open_detached(data_dir: &Path) -> StoreResult<Self> {
        Ok(Self {
            doc: JsonDocument::detached(data_dir.join("tasks.json"))?,
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            doc: JsonDocument::in_memory(),
        }
    }
}

impl TaskStore for JsonTaskStore {
    fn find_by_external_reference(
        &self,
        provider: &str,
        external_id: &str,
        integration_id: u64,
    ) -> StoreResult<Option<Task>> {
        self.doc.read(|data| {
            data.tasks
                .values()
                .find(|t| t.is_mirror_of(provider, external_id, integration_id))
                .cloned()
        })
    }

    fn upsert_by_external_reference(
        &self,
        provider: &str,
        external_id: &str,
        fields: TaskFields,
    ) -> StoreResult<UpsertResult> {
        self.doc.update(|data| {
            if let Some(task) = data.find_mut(provider, external_id, fields.integration_id) {
                if fields.matches(task) {
                    let result = UpsertResult {
                        task_id: task.id,
                        change: UpsertChange::Unchanged,
                    };
                    return Ok((result, false));
                }
                fields.apply_to(task);
                task.updated_at = Utc::now();
                let result = UpsertResult {
                    task_id: task.id,
                    change: UpsertChange::Updated,
                };
                return Ok((result, true));
            }

            data.next_id += 1;
            let now = Utc::now();
            let task = Task {
                id: data.next_id,
                title: fields.title,
                description: fields.description,
                status: fields.status,
                provider: provider.to_string(),
                external_id: external_id.to_string(),
                external_url: fields.external_url,
                external_state: fields.external_state,
                integration_id: fields.integration_id,
                created_at: now,
                updated_at: now,
            };
            data.tasks.insert(task.id, task);
            let result = UpsertResult {
                task_id: data.next_id,
                change: UpsertChange::Created,
            };
            Ok((result, true))
        })
    }

    fn list(&self) -> StoreResult<Vec<Task>> {
        self.doc.read(|data| data.tasks.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskStatus;

    fn fields(title: &str, state: &str, status: TaskStatus) -> TaskFields {
        TaskFields {
            title: title.into(),
            description: None,
            status,
            external_url: Some("https://github.com/acme/web/issues/1".into()),
            external_state: state.into(),
            integration_id: 1,
        }
    }

    fn owned_by(integration_id: u64, title: &str) -> TaskFields {
        TaskFields {
            integration_id,
            ..fields(title, "New", TaskStatus::Pending)
        }
    }

    #[test]
    fn upsert_creates_then_is_noop_then_updates() {
        let store = JsonTaskStore::in_memory();

        let created = store
            .upsert_by_external_reference("GitHub", "acme/web#1", fields("Fix", "open", TaskStatus::Pending))
            .unwrap();
        assert_eq!(created.change, UpsertChange::Created);

        let again = store
            .upsert_by_external_reference("GitHub", "acme/web#1", fields("Fix", "open", TaskStatus::Pending))
            .unwrap();
        assert_eq!(again.change, UpsertChange::Unchanged);
        assert_eq!(again.task_id, created.task_id);

        let updated = store
            .upsert_by_external_reference("GitHub", "acme/web#1", fields("Fix it", "open", TaskStatus::Pending))
            .unwrap();
        assert_eq!(updated.change, UpsertChange::Updated);

        let tasks = store.list().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Fix it");
    }

    #[test]
    fn same_external_id_on_different_providers_are_distinct() {
        let store = JsonTaskStore::in_memory();
        store
            .upsert_by_external_reference("GitHub", "42", fields("A", "open", TaskStatus::Pending))
            .unwrap();
        store
            .upsert_by_external_reference("AzureDevOps", "42", fields("B", "New", TaskStatus::Pending))
            .unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(
            store
                .find_by_external_reference("AzureDevOps", "42", 1)
                .unwrap()
                .unwrap()
                .title,
            "B"
        );
    }

    #[test]
    fn same_external_id_under_two_integrations_are_distinct() {
        let store = JsonTaskStore::in_memory();
        let a = store
            .upsert_by_external_reference("AzureDevOps", "42", owned_by(1, "Org A item"))
            .unwrap();
        let b = store
            .upsert_by_external_reference("AzureDevOps", "42", owned_by(2, "Org B item"))
            .unwrap();
        assert_eq!(a.change, UpsertChange::Created);
        assert_eq!(b.change, UpsertChange::Created);
        assert_ne!(a.task_id, b.task_id);

        let again = store
            .upsert_by_external_reference("AzureDevOps", "42", owned_by(1, "Org A item"))
            .unwrap();
        assert_eq!(again.change, UpsertChange::Unchanged);
        assert_eq!(
            store
                .find_by_external_reference("AzureDevOps", "42", 2)
                .unwrap()
                .unwrap()
                .title,
            "Org B item"
        );
    }

    #[test]
    fn detached_store_reads_but_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        JsonTaskStore::open(dir.path())
            .unwrap()
            .upsert_by_external_reference("GitHub", "1", fields("A", "open", TaskStatus::Pending))
            .unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let detached = JsonTaskStore::open_detached(dir.path()).unwrap();
        assert_eq!(detached.list().unwrap().len(), 1);
        detached
            .upsert_by_external_reference("GitHub", "2", fields("B", "open", TaskStatus::Pending))
            .unwrap();
        assert_eq!(detached.list().unwrap().len(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn unchanged_upsert_does_not_touch_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTaskStore::open(dir.path()).unwrap();
        store
            .upsert_by_external_reference("GitHub", "1", fields("A", "open", TaskStatus::Pending))
            .unwrap();
        let path = dir.path().join("tasks.json");
        let before = std::fs::read_to_string(&path).unwrap();

        store
            .upsert_by_external_reference("GitHub", "1", fields("A", "open", TaskStatus::Pending))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }
}
