use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("pending"),
            TaskStatus::InProgress => f.write_str("in progress"),
            TaskStatus::Completed => f.write_str("completed"),
        }
    }
}

/// Local task, optionally mirrored from a provider work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub provider: String,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    /// Remote state seen on the last sync, used to detect remote transitions
    pub external_state: String,
    pub integration_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Tasks belong to the integration that mirrored them, so one remote id
    /// seen through two integrations gives two tasks.
    pub fn is_mirror_of(&self, provider: &str, external_id: &str, integration_id: u64) -> bool {
        self.integration_id == integration_id
            && self.provider == provider
            && self.external_id == external_id
    }
}

/// Fields a sync writes into a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFields {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub external_url: Option<String>,
    pub external_state: String,
    pub integration_id: u64,
}

impl TaskFields {
    pub fn matches(&self, task: &Task) -> bool {
        self.title == task.title
            && self.description == task.description
            && self.status == task.status
            && self.external_url == task.external_url
            && self.external_state == task.external_state
            && self.integration_id == task.integration_id
    }

    pub fn apply_to(self, task: &mut Task) {
        task.title = self.title;
        task.description = self.description;
        task.status = self.status;
        task.external_url = self.external_url;
        task.external_state = self.external_state;
        task.integration_id = self.integration_id;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertChange {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertResult {
    pub task_id: u64,
    pub change: UpsertChange,
}
