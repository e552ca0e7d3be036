use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

const TRACKER_API_BASE: &str = "https://www.pivotaltracker.com/services/v5";

/// Workflow state of a tracker story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryState {
    Unscheduled,
    Unstarted,
    Planned,
    Started,
    Finished,
    Delivered,
    Accepted,
    Rejected,
}

impl StoryState {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unscheduled" => Some(StoryState::Unscheduled),
            "unstarted" => Some(StoryState::Unstarted),
            "planned" => Some(StoryState::Planned),
            "started" => Some(StoryState::Started),
            "finished" => Some(StoryState::Finished),
            "delivered" => Some(StoryState::Delivered),
            "accepted" => Some(StoryState::Accepted),
            "rejected" => Some(StoryState::Rejected),
            _ => None,
        }
    }

    /// Whether work on the story has at least begun.
    pub fn is_underway(&self) -> bool {
        matches!(
            self,
            StoryState::Started | StoryState::Finished | StoryState::Delivered | StoryState::Accepted
        )
    }
}

#[derive(Debug, Clone)]
pub struct Story {
    pub id: u64,
    pub state: StoryState,
    pub name: String,
}

/// Project-tracker lookups consumed by the tracker-linkage rule.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Resolve a story by id. `Ok(None)` means the tracker authoritatively
    /// does not know the story; `Err` means the lookup itself failed.
    async fn get_story(&self, story_id: u64) -> Result<Option<Story>>;
}

#[derive(Debug, Deserialize)]
struct StoryResponse {
    id: u64,
    current_state: String,
    name: String,
}

/// Pivotal Tracker client scoped to a single project.
#[derive(Clone)]
pub struct TrackerClient {
    client: Client,
    token: String,
    project_id: u64,
}

impl TrackerClient {
    pub fn new(token: String, project_id: u64) -> Self {
        Self {
            client: Client::new(),
            token,
            project_id,
        }
    }
}

#[async_trait]
impl Tracker for TrackerClient {
    async fn get_story(&self, story_id: u64) -> Result<Option<Story>> {
        let url = format!(
            "{}/projects/{}/stories/{}",
            TRACKER_API_BASE, self.project_id, story_id
        );

        let response = self
            .client
            .get(&url)
            .header("X-TrackerToken", &self.token)
            .send()
            .await
            .with_context(|| format!("Tracker request for story {} failed", story_id))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "Tracker returned {} for story {}",
                response.status(),
                story_id
            ));
        }

        let story: StoryResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to decode tracker story {}", story_id))?;

        let state = StoryState::parse(&story.current_state)
            .ok_or_else(|| anyhow!("Unknown tracker story state: {}", story.current_state))?;

        Ok(Some(Story {
            id: story.id,
            state,
            name: story.name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_state_parse() {
        assert_eq!(StoryState::parse("started"), Some(StoryState::Started));
        assert_eq!(StoryState::parse("accepted"), Some(StoryState::Accepted));
        assert_eq!(StoryState::parse("bogus"), None);
    }

    #[test]
    fn test_is_underway() {
        assert!(StoryState::Started.is_underway());
        assert!(StoryState::Finished.is_underway());
        assert!(StoryState::Delivered.is_underway());
        assert!(StoryState::Accepted.is_underway());
        assert!(!StoryState::Unstarted.is_underway());
        assert!(!StoryState::Unscheduled.is_underway());
        assert!(!StoryState::Rejected.is_underway());
    }
}
