//! Maps provider work items onto local task fields.

use crate::error::SyncError;
use crate::model::task::{Task, TaskFields, TaskStatus};
use crate::model::work_item::RemoteWorkItem;

/// Provider states treated as finished, compared case-insensitively.
const CLOSED_STATES: &[&str] = &["closed", "done", "completed", "resolved", "removed"];

pub fn is_closed_state(state: &str) -> bool {
    let state = state.trim();
    CLOSED_STATES.iter().any(|s| state.eq_ignore_ascii_case(s))
}

/// Local status for a remote state, given the task already mirrored (if any).
///
/// Closed remote states always complete the task. Otherwise a new task starts
/// as Pending, and an existing task only moves when the remote state changed
/// since the last sync: to InProgress, unless it is already Completed.
pub fn map_status(remote_state: &str, existing: Option<&Task>) -> TaskStatus {
    if is_closed_state(remote_state) {
        return TaskStatus::Completed;
    }
    match existing {
        None => TaskStatus::Pending,
        Some(task) if task.external_state == remote_state => task.status,
        Some(task) if task.status == TaskStatus::Completed => TaskStatus::Completed,
        Some(_) => TaskStatus::InProgress,
    }
}

pub fn map_work_item(
    item: &RemoteWorkItem,
    existing: Option<&Task>,
    integration_id: u64,
) -> Result<TaskFields, SyncError> {
    if item.external_id.trim().is_empty() {
        return Err(SyncError::Mapping {
            external_id: item.external_id.clone(),
            reason: "missing external id".into(),
        });
    }
    let title = item.title.trim();
    if title.is_empty() {
        return Err(SyncError::Mapping {
            external_id: item.external_id.clone(),
            reason: "missing title".into(),
        });
    }

    Ok(TaskFields {
        title: title.to_string(),
        description: item.description.clone(),
        status: map_status(&item.state, existing),
        external_url: item.url.clone(),
        external_state: item.state.clone(),
        integration_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(status: TaskStatus, external_state: &str) -> Task {
        Task {
            id: 1,
            title: "Fix login".into(),
            description: None,
            status,
            provider: "AzureDevOps".into(),
            external_id: "42".into(),
            external_url: None,
            external_state: external_state.into(),
            integration_id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn remote(external_id: &str, title: &str, state: &str) -> RemoteWorkItem {
        RemoteWorkItem {
            external_id: external_id.into(),
            title: title.into(),
            description: Some("details".into()),
            state: state.into(),
            url: Some("https://dev.azure.com/acme/_workitems/edit/42".into()),
        }
    }

    #[test]
    fn closed_vocabulary_is_case_insensitive() {
        for state in ["closed", "Closed", "DONE", "Resolved", " completed "] {
            assert!(is_closed_state(state), "{state}");
        }
        for state in ["open", "Active", "In Review", "New"] {
            assert!(!is_closed_state(state), "{state}");
        }
    }

    #[test]
    fn new_items_start_pending_or_completed() {
        assert_eq!(map_status("open", None), TaskStatus::Pending);
        assert_eq!(map_status("closed", None), TaskStatus::Completed);
    }

    #[test]
    fn unchanged_remote_state_keeps_local_status() {
        let existing = task(TaskStatus::Pending, "New");
        assert_eq!(map_status("New", Some(&existing)), TaskStatus::Pending);
    }

    #[test]
    fn changed_open_state_moves_to_in_progress() {
        let existing = task(TaskStatus::Pending, "New");
        assert_eq!(map_status("Active", Some(&existing)), TaskStatus::InProgress);
    }

    #[test]
    fn completed_task_stays_completed_on_reopen() {
        let existing = task(TaskStatus::Completed, "Closed");
        assert_eq!(map_status("Active", Some(&existing)), TaskStatus::Completed);
    }

    #[test]
    fn closing_remote_completes_existing_task() {
        let existing = task(TaskStatus::InProgress, "Active");
        assert_eq!(map_status("Done", Some(&existing)), TaskStatus::Completed);
    }

    #[test]
    fn maps_fields_and_trims_title() {
        let fields = map_work_item(&remote("42", "  Fix login ", "closed"), None, 9).unwrap();
        assert_eq!(fields.title, "Fix login");
        assert_eq!(fields.status, TaskStatus::Completed);
        assert_eq!(fields.external_state, "closed");
        assert_eq!(fields.integration_id, 9);
        assert_eq!(fields.description.as_deref(), Some("details"));
    }

    #[test]
    fn malformed_items_are_mapping_errors() {
        assert!(matches!(
            map_work_item(&remote("", "title", "open"), None, 1),
            Err(SyncError::Mapping { .. })
        ));
        match map_work_item(&remote("7", "   ", "open"), None, 1) {
            Err(SyncError::Mapping { external_id, reason }) => {
                assert_eq!(external_id, "7");
                assert_eq!(reason, "missing title");
            }
            other => panic!("expected mapping error, got {other:?}"),
        }
    }
}
