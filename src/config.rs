use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    /// Optional webhook HMAC secret. When unset, `/github-hook` accepts
    /// unsigned deliveries (matching the original deployment).
    pub github_webhook_secret: Option<String>,
    pub tracker_token: String,
    pub tracker_project_id: u64,
    pub circleci_token: String,
    /// Organization whose CI projects the dashboard displays.
    pub dashboard_org: String,
    /// Number of qualifying approvals required for a passing verdict.
    pub approval_threshold: u32,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_token =
            env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable is required")?;

        let github_webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let tracker_token =
            env::var("TRACKER_TOKEN").context("TRACKER_TOKEN environment variable is required")?;

        let tracker_project_id = env::var("TRACKER_PROJECT_ID")
            .context("TRACKER_PROJECT_ID environment variable is required")?
            .parse::<u64>()
            .context("TRACKER_PROJECT_ID must be a valid number")?;

        let circleci_token = env::var("CIRCLECI_TOKEN")
            .context("CIRCLECI_TOKEN environment variable is required")?;

        let dashboard_org = env::var("DASHBOARD_ORG")
            .context("DASHBOARD_ORG environment variable is required")?;

        let approval_threshold = env::var("APPROVAL_THRESHOLD")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<u32>()
            .context("APPROVAL_THRESHOLD must be a valid number")?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Ok(Config {
            github_token,
            github_webhook_secret,
            tracker_token,
            tracker_project_id,
            circleci_token,
            dashboard_org,
            approval_threshold,
            port,
            state_dir,
        })
    }
}

/// Parse an optional secret from an environment value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty secret can never silently disable signature verification.
pub fn parse_optional_secret(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
