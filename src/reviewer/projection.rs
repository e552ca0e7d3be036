//! Dashboard-projection rule.
//!
//! Runs last: folds the PR's lifecycle state and every earlier verdict into
//! a single [`PrRecord`] upsert. When an earlier processor errored, the
//! write is skipped entirely so the store keeps the last fully-successful
//! aggregation.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::{ReviewVerdict, ReviewerContext, ReviewerProcessor};
use crate::store::{PrRecord, ReviewAnnotation, StateStore};

pub struct ProjectionProcessor {
    store: Arc<dyn StateStore>,
}

impl ProjectionProcessor {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReviewerProcessor for ProjectionProcessor {
    fn name(&self) -> &'static str {
        "projection"
    }

    async fn evaluate(&self, ctx: &mut ReviewerContext) -> Result<ReviewVerdict> {
        if ctx.has_errors() {
            return Ok(ReviewVerdict::neutral(
                "aggregation skipped after earlier processor failure",
            ));
        }

        let annotations: Vec<ReviewAnnotation> = ctx
            .verdicts()
            .iter()
            .map(|slot| ReviewAnnotation {
                processor: slot.processor.clone(),
                classification: slot.verdict.kind,
                note: slot.verdict.annotation.clone(),
            })
            .collect();

        let record = PrRecord {
            owner: ctx.owner.clone(),
            repo: ctx.repo.clone(),
            number: ctx.pull_request.number,
            state: ctx.pull_request.state,
            updated_at: Utc::now(),
            annotations,
        };
        let key = record.locator();

        self.store
            .put_record(record)
            .await
            .with_context(|| format!("failed to persist record for {}", key))?;

        Ok(ReviewVerdict::pass(format!("recorded {}", key)))
    }
}
