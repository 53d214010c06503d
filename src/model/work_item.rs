use serde::{Deserialize, Serialize};

/// A work item as fetched from a provider, normalized across providers.
/// Produced fresh on every fetch and never stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWorkItem {
    /// Provider-side id (Azure DevOps work item id, GitHub `owner/repo#number`)
    pub external_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Provider-native state name, e.g. "Active", "closed"
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Limit descriptions to what the task list shows.
pub fn truncate_description(text: Option<String>) -> Option<String> {
    text.filter(|d| !d.trim().is_empty())
        .map(|d| d.trim().chars().take(500).collect::<String>())
}
