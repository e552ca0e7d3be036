pub mod circleci;
pub mod config;
pub mod crawl;
pub mod dashboard;
pub mod github;
pub mod queue;
pub mod reviewer;
pub mod store;
pub mod tracker;
pub mod webhook;

#[cfg(test)]
pub mod test_support;

use std::sync::Arc;

pub use queue::{JobHandle, JobState, PullRequestQueue, ReviewTarget};

use circleci::CiStatus;
use github::SourceControl;
use store::StateStore;

/// Process-wide state: constructed once at startup, immutable afterwards,
/// shared with the HTTP layer and crawl trigger.
pub struct AppState {
    pub queue: Arc<PullRequestQueue>,
    pub store: Arc<dyn StateStore>,
    pub source_control: Arc<dyn SourceControl>,
    pub ci: Arc<dyn CiStatus>,
    /// When set, webhook deliveries must carry a valid HMAC signature.
    pub webhook_secret: Option<String>,
    /// Organization whose CI projects the dashboard displays.
    pub dashboard_org: String,
}
