//! Tracker-linkage review rule.
//!
//! Resolves a project-tracker story from the PR description or head branch
//! name and checks that the story's workflow state is compatible with the
//! PR's lifecycle. Linkage is optional: no story reference anywhere is a
//! neutral verdict, not a failure.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{ReviewVerdict, ReviewerContext, ReviewerProcessor};
use crate::github::PrLifecycle;
use crate::tracker::Tracker;

pub struct TrackerProcessor {
    tracker: Arc<dyn Tracker>,
}

impl TrackerProcessor {
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self { tracker }
    }
}

/// Extract a story id from a PR description marker of the form `[#123456]`.
/// The first well-formed marker wins.
fn story_id_from_body(body: &str) -> Option<u64> {
    let mut rest = body;
    while let Some(start) = rest.find("[#") {
        let after = &rest[start + 2..];
        let digits: String = after.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() && after[digits.len()..].starts_with(']') {
            if let Ok(id) = digits.parse() {
                return Some(id);
            }
        }
        rest = &rest[start + 2..];
    }
    None
}

/// Extract a story id from a branch named `<digits>-description`, the
/// tracker's branch-naming convention.
fn story_id_from_branch(branch: &str) -> Option<u64> {
    let digits: String = branch.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() || !branch[digits.len()..].starts_with('-') {
        return None;
    }
    digits.parse().ok()
}

/// The description marker wins over the branch-name convention.
pub fn extract_story_id(body: Option<&str>, head_ref: &str) -> Option<u64> {
    body.and_then(story_id_from_body)
        .or_else(|| story_id_from_branch(head_ref))
}

#[async_trait]
impl ReviewerProcessor for TrackerProcessor {
    fn name(&self) -> &'static str {
        "tracker"
    }

    async fn evaluate(&self, ctx: &mut ReviewerContext) -> Result<ReviewVerdict> {
        let story_id = match extract_story_id(
            ctx.pull_request.body.as_deref(),
            &ctx.pull_request.head_ref,
        ) {
            Some(id) => id,
            None => return Ok(ReviewVerdict::neutral("no tracker story linked")),
        };

        ctx.story_id = Some(story_id);

        let story = match self.tracker.get_story(story_id).await? {
            Some(story) => story,
            None => {
                return Ok(ReviewVerdict::fail(format!(
                    "linked story #{} not found in tracker",
                    story_id
                )))
            }
        };

        // A merged PR must correspond to a story whose work has begun;
        // anything resolvable is acceptable while the PR is open or closed
        // unmerged.
        if ctx.pull_request.state == PrLifecycle::Merged && !story.state.is_underway() {
            return Ok(ReviewVerdict::fail(format!(
                "merged PR but story #{} is {:?}",
                story_id, story.state
            )));
        }

        Ok(ReviewVerdict::pass(format!(
            "story #{} is {:?}",
            story_id, story.state
        )))
    }
}
