use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;

use super::{check_response, ProviderAdapter};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::model::integration::Credentials;
use crate::model::work_item::{truncate_description, RemoteWorkItem};
use crate::util::html::html_to_text;

const API_VERSION: &str = "7.0";
/// Maximum ids accepted by the work items batch endpoint
const BATCH_SIZE: usize = 200;

pub struct AzureDevOpsAdapter {
    client: reqwest::Client,
}

impl AzureDevOpsAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn get(&self, credentials: &Credentials, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Authorization", auth_header(credentials))
            .header("Accept", "application/json")
    }

    async fn list_projects(&self, credentials: &Credentials) -> Result<Vec<String>, ProviderError> {
        let url = format!(
            "{}/_apis/projects?api-version={API_VERSION}",
            org_base(credentials)
        );
        let resp = check_response(self.get(credentials, &url).send().await?).await?;
        let projects: ListResponse<Project> = resp.json().await?;
        Ok(projects.value.into_iter().map(|p| p.name).collect())
    }

    async fn query_ids(
        &self,
        credentials: &Credentials,
        project: Option<&str>,
    ) -> Result<Vec<u64>, ProviderError> {
        let base = org_base(credentials);
        let url = match project {
            Some(p) => format!(
                "{base}/{}/_apis/wit/wiql?api-version={API_VERSION}",
                urlencoding::encode(p)
            ),
            None => format!("{base}/_apis/wit/wiql?api-version={API_VERSION}"),
        };
        let body = serde_json::json!({ "query": wiql_query(project) });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", auth_header(credentials))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let result: WiqlResponse = check_response(resp).await?.json().await?;
        Ok(result.work_items.into_iter().map(|w| w.id).collect())
    }

    async fn fetch_batch(
        &self,
        credentials: &Credentials,
        ids: &[u64],
    ) -> Result<Vec<WorkItem>, ProviderError> {
        let id_list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/_apis/wit/workitems?ids={id_list}&fields=System.Title,System.Description,System.State&errorPolicy=omit&api-version={API_VERSION}",
            org_base(credentials)
        );
        let resp = check_response(self.get(credentials, &url).send().await?).await?;
        let items: ListResponse<Option<WorkItem>> = resp.json().await?;
        // errorPolicy=omit returns null for items deleted since the query ran
        Ok(items.value.into_iter().flatten().collect())
    }
}

#[derive(Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
struct Project {
    name: String,
}

#[derive(Deserialize)]
struct WiqlResponse {
    #[serde(rename = "workItems", default)]
    work_items: Vec<WorkItemRef>,
}

#[derive(Deserialize)]
struct WorkItemRef {
    id: u64,
}

#[derive(Deserialize)]
struct WorkItem {
    id: u64,
    #[serde(default)]
    fields: HashMap<String, serde_json::Value>,
}

impl WorkItem {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

fn auth_header(credentials: &Credentials) -> String {
    let creds = format!(":{}", credentials.personal_access_token);
    let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
    format!("Basic {encoded}")
}

fn org_base(credentials: &Credentials) -> &str {
    credentials.organization_url.trim_end_matches('/')
}

fn wiql_query(project: Option<&str>) -> String {
    let mut query = String::from(
        "SELECT [System.Id] FROM WorkItems WHERE [System.AssignedTo] = @Me",
    );
    if let Some(project) = project {
        query.push_str(&format!(
            " AND [System.TeamProject] = '{}'",
            project.replace('\'', "''")
        ));
    }
    query.push_str(" ORDER BY [System.ChangedDate] DESC");
    query
}

fn to_remote(base: &str, item: WorkItem) -> RemoteWorkItem {
    let description = item
        .field("System.Description")
        .and_then(html_to_text);
    RemoteWorkItem {
        external_id: item.id.to_string(),
        title: item.field("System.Title").unwrap_or_default().to_string(),
        description: truncate_description(description),
        state: item.field("System.State").unwrap_or_default().to_string(),
        url: Some(format!("{base}/_workitems/edit/{}", item.id)),
    }
}

#[async_trait]
impl ProviderAdapter for AzureDevOpsAdapter {
    fn name(&self) -> &str {
        "AzureDevOps"
    }

    async fn test_connection(&self, credentials: &Credentials) -> Result<bool, ProviderError> {
        match self.list_projects(credentials).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind == ProviderErrorKind::Auth => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fetch_work_items(
        &self,
        credentials: &Credentials,
        project: Option<&str>,
    ) -> Result<Vec<RemoteWorkItem>, ProviderError> {
        let ids = self.query_ids(credentials, project).await?;
        let base = org_base(credentials);

        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BATCH_SIZE) {
            let batch = self.fetch_batch(credentials, chunk).await?;
            items.extend(batch.into_iter().map(|item| to_remote(base, item)));
        }
        Ok(items)
    }

    async fn fetch_projects(&self, credentials: &Credentials) -> Result<Vec<String>, ProviderError> {
        self.list_projects(credentials).await
    }
}
