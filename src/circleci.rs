use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

const CIRCLECI_API_BASE: &str = "https://circleci.com/api/v1.1";

/// A followed CI project with its per-branch recent builds.
#[derive(Debug, Clone, Deserialize)]
pub struct CiProject {
    pub vcs_url: String,
    pub reponame: String,
    #[serde(default)]
    pub branches: HashMap<String, BranchInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchInfo {
    #[serde(default)]
    pub recent_builds: Vec<RecentBuild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentBuild {
    pub build_num: u64,
    pub outcome: Option<String>,
}

/// CI build-status lookups, used only for dashboard display.
#[async_trait]
pub trait CiStatus: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<CiProject>>;
}

/// CircleCI v1.1 client authenticated with an API token.
#[derive(Clone)]
pub struct CircleCiClient {
    client: Client,
    token: String,
}

impl CircleCiClient {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::new(),
            token,
        }
    }
}

#[async_trait]
impl CiStatus for CircleCiClient {
    async fn list_projects(&self) -> Result<Vec<CiProject>> {
        let url = format!("{}/projects?circle-token={}", CIRCLECI_API_BASE, self.token);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("CircleCI projects request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("CircleCI returned {}", response.status()));
        }

        response
            .json::<Vec<CiProject>>()
            .await
            .context("Failed to decode CircleCI projects response")
    }
}
