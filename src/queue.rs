//! Review job queue: per-identity scheduling with burst coalescing.
//!
//! Webhook deliveries arrive in bursts, often several for the same pull
//! request within a second. The queue admits one worker per job identity
//! and folds every request that lands mid-execution into a single follow-up
//! run, so the pipeline re-fetches once instead of once per delivery while
//! still observing data no older than the last request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::github::SourceControl;
use crate::reviewer::{ReviewVerdict, ReviewerContext, ReviewerFactory, VerdictKind};

/// What a review job targets: one pull request, or a scan that expands to
/// every open pull request in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewTarget {
    Pull(u64),
    RepoScan,
}

/// Identity of one unit of review work. Jobs sharing an identity are
/// serialized; distinct identities run independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub owner: String,
    pub repo: String,
    pub target: ReviewTarget,
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target {
            ReviewTarget::Pull(number) => write!(f, "{}/{}#{}", self.owner, self.repo, number),
            ReviewTarget::RepoScan => write!(f, "{}/{} (repo scan)", self.owner, self.repo),
        }
    }
}

/// Job lifecycle as observed through a [`JobHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    RetryPending,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Handle returned by [`PullRequestQueue::enqueue`].
///
/// Terminal states are published only once the identity fully drains:
/// a handle whose job picked up coalesced follow-ups resolves after the
/// last follow-up execution finishes.
pub struct JobHandle {
    pub id: JobId,
    /// True when this request was folded into an already-admitted job.
    pub coalesced: bool,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&mut self) -> JobState {
        loop {
            {
                let state = *self.state.borrow_and_update();
                if state.is_terminal() {
                    return state;
                }
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow();
            }
        }
    }
}

/// Bounded-retry policy applied to each admitted execution.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on one attempt, so a hung fetch counts as a failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base, 2x base, 4x base, ...
    fn delay_before_retry(&self, completed_attempts: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(completed_attempts.saturating_sub(1))
    }
}

struct InflightEntry {
    /// Set when an enqueue lands while this identity is executing; consumed
    /// by the worker under the same lock that retires the entry.
    rerun_requested: bool,
    state_tx: watch::Sender<JobState>,
}

/// The scheduler: accepts enqueue requests keyed by job identity,
/// deduplicates bursts, and runs the registered reviewer pipeline against
/// each admitted job.
pub struct PullRequestQueue {
    shared: Arc<QueueShared>,
}

struct QueueShared {
    source_control: Arc<dyn SourceControl>,
    factories: Vec<ReviewerFactory>,
    retry_policy: RetryPolicy,
    inflight: Mutex<HashMap<JobId, InflightEntry>>,
}

impl PullRequestQueue {
    pub fn new(source_control: Arc<dyn SourceControl>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                source_control,
                factories: Vec::new(),
                retry_policy: RetryPolicy::default(),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        Arc::get_mut(&mut self.shared)
            .expect("retry policy is configured before the queue accepts jobs")
            .retry_policy = retry_policy;
        self
    }

    /// Register a reviewer factory. Factories run in registration order on
    /// every job execution. Registration happens only during startup: once
    /// the first job has been admitted the queue core is shared with its
    /// workers and further registration panics.
    pub fn add_reviewer_factory(&mut self, factory: ReviewerFactory) {
        Arc::get_mut(&mut self.shared)
            .expect("reviewer factories are registered before the queue accepts jobs")
            .factories
            .push(factory);
    }

    /// Submit a job. A request for an identity that is already pending or
    /// executing is coalesced: it spawns no second worker but guarantees one
    /// follow-up execution that fetches fresh data.
    pub async fn enqueue(&self, owner: &str, repo: &str, target: ReviewTarget) -> JobHandle {
        let id = JobId {
            owner: owner.to_string(),
            repo: repo.to_string(),
            target,
        };
        QueueShared::enqueue(&self.shared, id).await
    }
}

impl QueueShared {
    // Returns a boxed future rather than being declared `async fn` because
    // this function is indirectly recursive (via `expand_repo_scan`); an
    // unboxed recursive async fn produces a self-referential future type
    // the compiler cannot prove `Send` for.
    fn enqueue(shared: &Arc<Self>, id: JobId) -> Pin<Box<dyn Future<Output = JobHandle> + Send + '_>> {
        Box::pin(async move {
            let mut inflight = shared.inflight.lock().await;
            if let Some(entry) = inflight.get_mut(&id) {
                entry.rerun_requested = true;
                info!("Coalesced enqueue for {}", id);
                return JobHandle {
                    id,
                    coalesced: true,
                    state: entry.state_tx.subscribe(),
                };
            }

            let (state_tx, state_rx) = watch::channel(JobState::Queued);
            inflight.insert(
                id.clone(),
                InflightEntry {
                    rerun_requested: false,
                    state_tx: state_tx.clone(),
                },
            );
            drop(inflight);

            info!("Enqueued job for {}", id);

            let worker = shared.clone();
            let worker_id = id.clone();
            tokio::spawn(async move {
                worker.drive(worker_id, state_tx).await;
            });

            JobHandle {
                id,
                coalesced: false,
                state: state_rx,
            }
        })
    }

    /// Worker for one admitted identity: run, then re-run while a coalesced
    /// request arrived mid-execution, then retire the in-flight entry.
    async fn drive(self: Arc<Self>, id: JobId, state_tx: watch::Sender<JobState>) {
        loop {
            let outcome = Self::run_with_retries(&self, &id, &state_tx).await;

            {
                let mut inflight = self.inflight.lock().await;
                match inflight.get_mut(&id) {
                    Some(entry) if entry.rerun_requested => {
                        entry.rerun_requested = false;
                        info!("Re-running {} for requests coalesced mid-execution", id);
                        continue;
                    }
                    Some(_) => {
                        inflight.remove(&id);
                    }
                    None => {
                        error!("In-flight entry for {} vanished", id);
                    }
                }
            }

            state_tx.send_replace(outcome);
            break;
        }
    }

    async fn run_with_retries(
        shared: &Arc<Self>,
        id: &JobId,
        state_tx: &watch::Sender<JobState>,
    ) -> JobState {
        for attempt in 1..=shared.retry_policy.max_attempts {
            state_tx.send_replace(JobState::Running);

            match timeout(shared.retry_policy.attempt_timeout, Self::run_once(shared, id)).await {
                Ok(Ok(())) => {
                    info!("Job {} succeeded on attempt {}", id, attempt);
                    return JobState::Succeeded;
                }
                Ok(Err(e)) => {
                    warn!("Attempt {} for {} failed: {:#}", attempt, id, e);
                }
                Err(_) => {
                    warn!(
                        "Attempt {} for {} timed out after {:?}",
                        attempt, id, shared.retry_policy.attempt_timeout
                    );
                }
            }

            if attempt < shared.retry_policy.max_attempts {
                state_tx.send_replace(JobState::RetryPending);
                tokio::time::sleep(shared.retry_policy.delay_before_retry(attempt)).await;
            }
        }

        error!(
            "Job {} permanently failed after {} attempts",
            id, shared.retry_policy.max_attempts
        );
        JobState::Failed
    }

    async fn run_once(shared: &Arc<Self>, id: &JobId) -> Result<()> {
        match id.target {
            ReviewTarget::Pull(number) => shared.review_pull(id, number).await,
            ReviewTarget::RepoScan => Self::expand_repo_scan(shared, id).await,
        }
    }

    /// One pipeline execution: fetch fresh PR data, build a context, run
    /// every registered processor in order, each into its own verdict slot.
    async fn review_pull(&self, id: &JobId, number: u64) -> Result<()> {
        let pr = self
            .source_control
            .get_pull_request(&id.owner, &id.repo, number)
            .await?;

        let mut ctx = ReviewerContext::new(id.owner.clone(), id.repo.clone(), pr);

        for factory in &self.factories {
            let processor = factory(&ctx);
            let name = processor.name();

            let verdict = match processor.evaluate(&mut ctx).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!("Processor {} failed for {}: {:#}", name, id, e);
                    ReviewVerdict::error(format!("{:#}", e))
                }
            };

            ctx.record_verdict(name, verdict)?;
        }

        if ctx.has_errors() {
            let failed: Vec<&str> = ctx
                .verdicts()
                .iter()
                .filter(|slot| slot.verdict.kind == VerdictKind::Error)
                .map(|slot| slot.processor.as_str())
                .collect();
            return Err(anyhow!("processors failed: {}", failed.join(", ")));
        }

        Ok(())
    }

    /// Expand a repository scan into one sub-job per open pull request.
    /// Sub-jobs go back through the queue, so they get the same per-identity
    /// serialization and coalescing as webhook-triggered jobs.
    async fn expand_repo_scan(shared: &Arc<Self>, id: &JobId) -> Result<()> {
        let open = shared
            .source_control
            .list_open_pull_requests(&id.owner, &id.repo)
            .await?;

        info!(
            "Repository scan for {}/{} found {} open pull requests",
            id.owner,
            id.repo,
            open.len()
        );

        for pr in open {
            let sub_job = JobId {
                owner: id.owner.clone(),
                repo: id.repo.clone(),
                target: ReviewTarget::Pull(pr.number),
            };
            Self::enqueue(shared, sub_job).await;
        }

        Ok(())
    }
}
