use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::warn;

use super::ProviderAdapter;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::model::integration::Credentials;
use crate::model::work_item::{truncate_description, RemoteWorkItem};

const PER_PAGE: usize = 100;
/// Stop paging after this many pages so a huge backlog can't stall a cycle
const MAX_PAGES: usize = 10;

pub struct GitHubAdapter {
    client: reqwest::Client,
}

impl GitHubAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get(&self, credentials: &Credentials, url: &str) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .get(url)
            .header(
                "Authorization",
                format!("Bearer {}", credentials.personal_access_token),
            )
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?;
        check_github_response(resp).await
    }

    async fn get_paged<T: for<'de> Deserialize<'de>>(
        &self,
        credentials: &Credentials,
        url: &str,
    ) -> Result<Vec<T>, ProviderError> {
        let separator = if url.contains('?') { '&' } else { '?' };
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let page_url = format!("{url}{separator}per_page={PER_PAGE}&page={page}");
            let batch: Vec<T> = self.get(credentials, &page_url).await?.json().await?;
            let len = batch.len();
            all.extend(batch);
            match page_state(page, len) {
                Page::More => {}
                Page::Last => break,
                Page::Capped => {
                    warn!(
                        url = %url,
                        org = %credentials.organization_url,
                        items = all.len(),
                        "Page limit reached, remaining results not fetched"
                    );
                    break;
                }
            }
        }
        Ok(all)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Page {
    More,
    Last,
    Capped,
}

fn page_state(page: usize, batch_len: usize) -> Page {
    if batch_len < PER_PAGE {
        Page::Last
    } else if page >= MAX_PAGES {
        Page::Capped
    } else {
        Page::More
    }
}

/// GitHub signals an exhausted rate limit with 403 plus a zero remaining header.
async fn check_github_response(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let exhausted = resp
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::FORBIDDEN && exhausted {
        return Err(ProviderError::new(
            ProviderErrorKind::RateLimited,
            "GitHub API rate limit exhausted",
        ));
    }
    Err(ProviderError::from_status(status, &body))
}

/// Where an integration points: API root plus the optional owner from the URL path.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    api_base: String,
    owner: Option<String>,
}

fn target(credentials: &Credentials) -> Target {
    let url = credentials.organization_url.trim_end_matches('/');
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let (host, path) = without_scheme
        .split_once('/')
        .unwrap_or((without_scheme, ""));
    let owner = path
        .split('/')
        .find(|s| !s.is_empty())
        .map(String::from);

    let api_base = if host.eq_ignore_ascii_case("github.com") || host.eq_ignore_ascii_case("api.github.com") {
        "https://api.github.com".to_string()
    } else {
        let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or("https");
        format!("{scheme}://{host}/api/v3")
    };

    // api.github.com has no owner in its path
    let owner = if host.eq_ignore_ascii_case("api.github.com") { None } else { owner };
    Target { api_base, owner }
}

/// `owner/repo` from a project filter, falling back to the integration's owner.
fn repo_path(target: &Target, project: &str) -> Option<String> {
    match project.split_once('/') {
        Some((owner, repo)) => Some(format!(
            "{}/{}",
            urlencoding::encode(owner),
            urlencoding::encode(repo)
        )),
        None => target.owner.as_ref().map(|owner| {
            format!(
                "{}/{}",
                urlencoding::encode(owner),
                urlencoding::encode(project)
            )
        }),
    }
}

#[derive(Deserialize)]
struct Issue {
    number: u64,
    title: String,
    body: Option<String>,
    state: String,
    html_url: Option<String>,
    repository_url: Option<String>,
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Repo {
    full_name: String,
}

#[derive(Deserialize)]
struct User {
    #[allow(dead_code)]
    login: String,
}

fn repo_from_api_url(url: &str) -> Option<String> {
    let rest = url.split_once("/repos/")?.1;
    Some(rest.trim_end_matches('/').to_string())
}

fn to_remote(issue: Issue, fallback_repo: Option<&str>) -> RemoteWorkItem {
    let repo = issue
        .repository_url
        .as_deref()
        .and_then(repo_from_api_url)
        .or_else(|| fallback_repo.map(String::from))
        .unwrap_or_default();
    RemoteWorkItem {
        external_id: format!("{repo}#{}", issue.number),
        title: issue.title,
        description: truncate_description(issue.body),
        state: issue.state,
        url: issue.html_url,
    }
}

#[async_trait]
impl ProviderAdapter for GitHubAdapter {
    fn name(&self) -> &str {
        "GitHub"
    }

    async fn test_connection(&self, credentials: &Credentials) -> Result<bool, ProviderError> {
        let url = format!("{}/user", target(credentials).api_base);
        match self.get(credentials, &url).await {
            Ok(resp) => {
                let _user: User = resp.json().await?;
                Ok(true)
            }
            Err(e) if e.kind == ProviderErrorKind::Auth => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fetch_work_items(
        &self,
        credentials: &Credentials,
        project: Option<&str>,
    ) -> Result<Vec<RemoteWorkItem>, ProviderError> {
        let target = target(credentials);
        let (url, repo) = match project {
            Some(project) => {
                let repo = repo_path(&target, project).ok_or_else(|| {
                    ProviderError::unknown(format!(
                        "project {project:?} needs an owner: use owner/repo or put the owner in the organization URL"
                    ))
                })?;
                (
                    format!("{}/repos/{repo}/issues?state=all", target.api_base),
                    Some(repo),
                )
            }
            None => (
                format!("{}/issues?filter=assigned&state=all", target.api_base),
                None,
            ),
        };

        let issues: Vec<Issue> = self.get_paged(credentials, &url).await?;
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| to_remote(issue, repo.as_deref()))
            .collect())
    }

    async fn fetch_projects(&self, credentials: &Credentials) -> Result<Vec<String>, ProviderError> {
        let target = target(credentials);
        let url = match &target.owner {
            Some(owner) => format!("{}/orgs/{}/repos", target.api_base, urlencoding::encode(owner)),
            None => format!("{}/user/repos", target.api_base),
        };
        let repos: Vec<Repo> = match self.get_paged(credentials, &url).await {
            Err(e) if e.message.starts_with("HTTP 404") && target.owner.is_some() => {
                // The owner is a user, not an organization
                let owner = target.owner.as_deref().unwrap_or_default();
                let user_url = format!("{}/users/{}/repos", target.api_base, urlencoding::encode(owner));
                self.get_paged(credentials, &user_url).await?
            }
            other => other?,
        };
        Ok(repos.into_iter().map(|r| r.full_name).collect())
    }
}
