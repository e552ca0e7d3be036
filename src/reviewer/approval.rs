//! Approval-count review rule.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{ReviewVerdict, ReviewerContext, ReviewerProcessor};
use crate::github::SourceControl;

/// Passes when the pull request has at least `threshold` qualifying
/// approvals. An approval qualifies if it comes from someone other than the
/// PR author; repeat approvals by one reviewer count once.
pub struct ApprovalProcessor {
    source_control: Arc<dyn SourceControl>,
    threshold: u32,
}

impl ApprovalProcessor {
    pub fn new(source_control: Arc<dyn SourceControl>, threshold: u32) -> Self {
        Self {
            source_control,
            threshold,
        }
    }
}

#[async_trait]
impl ReviewerProcessor for ApprovalProcessor {
    fn name(&self) -> &'static str {
        "approval"
    }

    async fn evaluate(&self, ctx: &mut ReviewerContext) -> Result<ReviewVerdict> {
        let approvals = self
            .source_control
            .list_approvals(&ctx.owner, &ctx.repo, ctx.pull_request.number)
            .await?;

        let reviewers: HashSet<&str> = approvals
            .iter()
            .map(|a| a.reviewer.as_str())
            .filter(|reviewer| *reviewer != ctx.pull_request.author)
            .collect();

        let count = reviewers.len() as u32;
        ctx.approval_count = Some(count);

        if count >= self.threshold {
            Ok(ReviewVerdict::pass(format!(
                "{} of {} required approvals",
                count, self.threshold
            )))
        } else {
            Ok(ReviewVerdict::fail(format!(
                "{} of {} required approvals",
                count, self.threshold
            )))
        }
    }
}
