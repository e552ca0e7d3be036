use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "mergeboard";

/// Lifecycle state of a pull request as the dashboard displays it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrLifecycle {
    Open,
    Merged,
    Closed,
}

impl PrLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrLifecycle::Open => "open",
            PrLifecycle::Merged => "merged",
            PrLifecycle::Closed => "closed",
        }
    }
}

/// Pull-request payload as fetched for one review job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestData {
    pub number: u64,
    pub title: String,
    pub state: PrLifecycle,
    pub body: Option<String>,
    pub head_ref: String,
    pub base_ref: String,
    pub author: String,
    pub html_url: String,
}

/// One qualifying-candidate approval on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub reviewer: String,
}

/// A team the authenticated actor belongs to.
#[derive(Debug, Clone)]
pub struct Team {
    pub id: u64,
    pub name: String,
}

/// A repository owned by a team, as discovered during a crawl.
#[derive(Debug, Clone)]
pub struct RepoSummary {
    pub owner: String,
    pub name: String,
}

/// Source-control operations the review pipeline and crawl depend on.
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestData>;

    async fn list_open_pull_requests(&self, owner: &str, repo: &str)
        -> Result<Vec<PullRequestData>>;

    /// Approved reviews on a PR, one entry per review. Deduplication by
    /// reviewer is the caller's concern.
    async fn list_approvals(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Approval>>;

    async fn list_teams(&self) -> Result<Vec<Team>>;

    async fn list_team_repos(&self, team_id: u64) -> Result<Vec<RepoSummary>>;
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    title: String,
    state: String,
    merged_at: Option<String>,
    body: Option<String>,
    head: RefResponse,
    base: RefResponse,
    user: UserResponse,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    state: String,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct TeamResponse {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TeamRepoResponse {
    name: String,
    owner: UserResponse,
}

impl PullRequestResponse {
    fn into_data(self) -> PullRequestData {
        let state = match self.state.as_str() {
            "open" => PrLifecycle::Open,
            _ if self.merged_at.is_some() => PrLifecycle::Merged,
            _ => PrLifecycle::Closed,
        };

        PullRequestData {
            number: self.number,
            title: self.title,
            state,
            body: self.body,
            head_ref: self.head.ref_name,
            base_ref: self.base.ref_name,
            author: self.user.login,
            html_url: self.html_url,
        }
    }
}

/// GitHub REST client authenticated with a personal access token.
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    token: String,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::new(),
            token,
            base_url: GITHUB_API_BASE.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .with_context(|| format!("GitHub request to {} failed", path))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(anyhow!("GitHub returned 404 for {}", path));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GitHub returned {} for {}: {}", status, path, body));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode GitHub response from {}", path))
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestData> {
        let response: PullRequestResponse = self
            .get_json(&format!("/repos/{}/{}/pulls/{}", owner, repo, number))
            .await?;
        Ok(response.into_data())
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequestData>> {
        let response: Vec<PullRequestResponse> = self
            .get_json(&format!("/repos/{}/{}/pulls?state=open&per_page=100", owner, repo))
            .await?;
        Ok(response.into_iter().map(PullRequestResponse::into_data).collect())
    }

    async fn list_approvals(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Approval>> {
        let response: Vec<ReviewResponse> = self
            .get_json(&format!(
                "/repos/{}/{}/pulls/{}/reviews?per_page=100",
                owner, repo, number
            ))
            .await?;

        Ok(response
            .into_iter()
            .filter(|r| r.state == "APPROVED")
            .map(|r| Approval {
                reviewer: r.user.login,
            })
            .collect())
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        let response: Vec<TeamResponse> = self.get_json("/user/teams?per_page=100").await?;
        Ok(response
            .into_iter()
            .map(|t| Team {
                id: t.id,
                name: t.name,
            })
            .collect())
    }

    async fn list_team_repos(&self, team_id: u64) -> Result<Vec<RepoSummary>> {
        let response: Vec<TeamRepoResponse> = self
            .get_json(&format!("/teams/{}/repos?per_page=100", team_id))
            .await?;

        if response.is_empty() {
            warn!("Team {} has no repositories", team_id);
        }

        Ok(response
            .into_iter()
            .map(|r| RepoSummary {
                owner: r.owner.login,
                name: r.name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr_response(state: &str, merged_at: Option<&str>) -> PullRequestResponse {
        PullRequestResponse {
            number: 42,
            title: "Add feature".to_string(),
            state: state.to_string(),
            merged_at: merged_at.map(str::to_string),
            body: None,
            head: RefResponse {
                ref_name: "feature".to_string(),
            },
            base: RefResponse {
                ref_name: "master".to_string(),
            },
            user: UserResponse {
                login: "alice".to_string(),
            },
            html_url: "https://github.com/o/r/pull/42".to_string(),
        }
    }

    #[test]
    fn test_open_pr_maps_to_open() {
        assert_eq!(pr_response("open", None).into_data().state, PrLifecycle::Open);
    }

    #[test]
    fn test_closed_pr_without_merge_maps_to_closed() {
        assert_eq!(
            pr_response("closed", None).into_data().state,
            PrLifecycle::Closed
        );
    }

    #[test]
    fn test_closed_pr_with_merge_timestamp_maps_to_merged() {
        assert_eq!(
            pr_response("closed", Some("2016-01-01T00:00:00Z")).into_data().state,
            PrLifecycle::Merged
        );
    }

    #[test]
    fn test_lifecycle_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PrLifecycle::Merged).unwrap(),
            "\"merged\""
        );
    }
}
