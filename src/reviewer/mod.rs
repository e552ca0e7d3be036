//! Reviewer pipeline primitives.
//!
//! A review job builds one [`ReviewerContext`] per execution, then runs every
//! registered processor against it in registration order. Each processor owns
//! exactly one verdict slot; slots are write-once so no rule can clobber
//! another's result.

pub mod approval;
pub mod projection;
pub mod tracker_link;

pub use approval::ApprovalProcessor;
pub use projection::ProjectionProcessor;
pub use tracker_link::TrackerProcessor;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::github::PullRequestData;

/// Classification half of a processor's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Pass,
    Fail,
    /// The rule does not apply to this pull request.
    Neutral,
    /// The processor itself failed; the job will be retried.
    Error,
}

/// Outcome of one processor run: a classification plus an optional
/// human-readable annotation for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub kind: VerdictKind,
    pub annotation: Option<String>,
}

impl ReviewVerdict {
    pub fn pass(annotation: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::Pass,
            annotation: Some(annotation.into()),
        }
    }

    pub fn fail(annotation: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::Fail,
            annotation: Some(annotation.into()),
        }
    }

    pub fn neutral(annotation: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::Neutral,
            annotation: Some(annotation.into()),
        }
    }

    pub fn error(annotation: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::Error,
            annotation: Some(annotation.into()),
        }
    }
}

/// One filled verdict slot, tagged with the processor that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictSlot {
    pub processor: String,
    pub verdict: ReviewVerdict,
}

/// Per-execution handle bundling the job identity, the fetched pull-request
/// payload, and the scratch annotations processors leave for each other.
///
/// Owned exclusively by the job execution that created it and dropped when
/// the execution completes; never shared across jobs.
#[derive(Debug)]
pub struct ReviewerContext {
    pub owner: String,
    pub repo: String,
    pub pull_request: PullRequestData,
    /// Qualifying-approval count, filled by the approval rule.
    pub approval_count: Option<u32>,
    /// Linked tracker story, filled by the tracker rule.
    pub story_id: Option<u64>,
    verdicts: Vec<VerdictSlot>,
}

impl ReviewerContext {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, pr: PullRequestData) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            pull_request: pr,
            approval_count: None,
            story_id: None,
            verdicts: Vec::new(),
        }
    }

    /// Record a processor's verdict. Each processor gets exactly one slot;
    /// a second write under the same name is rejected.
    pub fn record_verdict(&mut self, processor: &str, verdict: ReviewVerdict) -> Result<()> {
        if self.verdicts.iter().any(|slot| slot.processor == processor) {
            bail!("verdict slot for {} already written", processor);
        }
        self.verdicts.push(VerdictSlot {
            processor: processor.to_string(),
            verdict,
        });
        Ok(())
    }

    /// Filled slots in the order they were written (= registration order).
    pub fn verdicts(&self) -> &[VerdictSlot] {
        &self.verdicts
    }

    pub fn has_errors(&self) -> bool {
        self.verdicts
            .iter()
            .any(|slot| slot.verdict.kind == VerdictKind::Error)
    }
}

/// One independent review rule: evaluate the shared context, produce a
/// verdict for this processor's own slot.
#[async_trait]
pub trait ReviewerProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, ctx: &mut ReviewerContext) -> Result<ReviewVerdict>;
}

/// Factory invoked once per job execution to build a processor bound to that
/// execution's context. Registered with the queue at startup, before any
/// jobs are accepted.
pub type ReviewerFactory = Box<dyn Fn(&ReviewerContext) -> Box<dyn ReviewerProcessor> + Send + Sync>;
