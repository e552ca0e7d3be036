//! Shared mock collaborators for unit and scenario tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use crate::circleci::{CiProject, CiStatus};
use crate::github::{Approval, PrLifecycle, PullRequestData, RepoSummary, SourceControl, Team};
use crate::tracker::{Story, StoryState, Tracker};

/// Build a plain pull-request payload for tests.
pub fn pr_data(number: u64, state: PrLifecycle) -> PullRequestData {
    PullRequestData {
        number,
        title: format!("Change #{}", number),
        state,
        body: None,
        head_ref: format!("feature-{}", number),
        base_ref: "master".to_string(),
        author: "alice".to_string(),
        html_url: format!("https://github.com/codius/foo/pull/{}", number),
    }
}

/// Consume one injected failure if any remain.
fn take_failure(counter: &AtomicU32) -> bool {
    loop {
        let current = counter.load(Ordering::SeqCst);
        if current == 0 {
            return false;
        }
        if counter
            .compare_exchange(
                current,
                current.saturating_sub(1),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            return true;
        }
    }
}

#[derive(Clone)]
struct GateInner {
    started_tx: mpsc::UnboundedSender<()>,
    permits: Arc<Semaphore>,
}

/// Test-side handle to a gated mock: observe fetch starts, release permits.
pub struct FetchGate {
    started_rx: mpsc::UnboundedReceiver<()>,
    permits: Arc<Semaphore>,
}

impl FetchGate {
    /// Wait until a gated fetch has begun.
    pub async fn started(&mut self) {
        self.started_rx.recv().await.expect("mock dropped");
    }

    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }
}

/// Programmable in-memory [`SourceControl`].
pub struct MockSourceControl {
    prs: Mutex<HashMap<(String, String, u64), PullRequestData>>,
    approvals: Mutex<HashMap<(String, String, u64), Vec<Approval>>>,
    teams: Mutex<Vec<Team>>,
    team_repos: Mutex<HashMap<u64, Vec<RepoSummary>>>,
    failing_team_repos: Mutex<Vec<u64>>,
    fetch_count: AtomicU32,
    fail_fetches: AtomicU32,
    fail_approval_lists: AtomicU32,
    gate: Mutex<Option<GateInner>>,
}

impl MockSourceControl {
    pub fn new() -> Self {
        Self {
            prs: Mutex::new(HashMap::new()),
            approvals: Mutex::new(HashMap::new()),
            teams: Mutex::new(Vec::new()),
            team_repos: Mutex::new(HashMap::new()),
            failing_team_repos: Mutex::new(Vec::new()),
            fetch_count: AtomicU32::new(0),
            fail_fetches: AtomicU32::new(0),
            fail_approval_lists: AtomicU32::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn set_pull_request(&self, owner: &str, repo: &str, pr: PullRequestData) {
        self.prs
            .lock()
            .unwrap()
            .insert((owner.to_string(), repo.to_string(), pr.number), pr);
    }

    pub fn set_approvals(&self, owner: &str, repo: &str, number: u64, reviewers: &[&str]) {
        self.approvals.lock().unwrap().insert(
            (owner.to_string(), repo.to_string(), number),
            reviewers
                .iter()
                .map(|r| Approval {
                    reviewer: r.to_string(),
                })
                .collect(),
        );
    }

    pub fn set_teams(&self, teams: Vec<Team>) {
        *self.teams.lock().unwrap() = teams;
    }

    pub fn set_team_repos(&self, team_id: u64, repos: Vec<RepoSummary>) {
        self.team_repos.lock().unwrap().insert(team_id, repos);
    }

    /// Make `list_team_repos` fail for the given team.
    pub fn fail_team_repos(&self, team_id: u64) {
        self.failing_team_repos.lock().unwrap().push(team_id);
    }

    pub fn fail_next_fetches(&self, n: u32) {
        self.fail_fetches.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_approval_lists(&self, n: u32) {
        self.fail_approval_lists.store(n, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Gate subsequent PR fetches: each fetch signals its start, then blocks
    /// until the returned handle releases a permit.
    pub fn gate_fetches(&self) -> FetchGate {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(GateInner {
            started_tx,
            permits: permits.clone(),
        });
        FetchGate {
            started_rx,
            permits,
        }
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.started_tx.send(());
            let permit = gate.permits.acquire().await.expect("gate closed");
            permit.forget();
        }
    }
}

impl Default for MockSourceControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceControl for MockSourceControl {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequestData> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;

        if take_failure(&self.fail_fetches) {
            return Err(anyhow!("injected fetch failure"));
        }

        self.prs
            .lock()
            .unwrap()
            .get(&(owner.to_string(), repo.to_string(), number))
            .cloned()
            .ok_or_else(|| anyhow!("unknown PR {}/{}#{}", owner, repo, number))
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequestData>> {
        let prs = self.prs.lock().unwrap();
        let mut open: Vec<PullRequestData> = prs
            .iter()
            .filter(|((o, r, _), pr)| {
                o == owner && r == repo && pr.state == PrLifecycle::Open
            })
            .map(|(_, pr)| pr.clone())
            .collect();
        open.sort_by_key(|pr| pr.number);
        Ok(open)
    }

    async fn list_approvals(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Approval>> {
        if take_failure(&self.fail_approval_lists) {
            return Err(anyhow!("injected approval-list failure"));
        }

        Ok(self
            .approvals
            .lock()
            .unwrap()
            .get(&(owner.to_string(), repo.to_string(), number))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        Ok(self.teams.lock().unwrap().clone())
    }

    async fn list_team_repos(&self, team_id: u64) -> Result<Vec<RepoSummary>> {
        if self.failing_team_repos.lock().unwrap().contains(&team_id) {
            return Err(anyhow!("injected team-repo failure for team {}", team_id));
        }

        Ok(self
            .team_repos
            .lock()
            .unwrap()
            .get(&team_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Programmable in-memory [`Tracker`].
pub struct MockTracker {
    stories: Mutex<HashMap<u64, StoryState>>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self {
            stories: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_story(&self, id: u64, state: StoryState) {
        self.stories.lock().unwrap().insert(id, state);
    }
}

impl Default for MockTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tracker for MockTracker {
    async fn get_story(&self, story_id: u64) -> Result<Option<Story>> {
        Ok(self.stories.lock().unwrap().get(&story_id).map(|state| Story {
            id: story_id,
            state: *state,
            name: format!("Story {}", story_id),
        }))
    }
}

/// Fixed-response [`CiStatus`].
pub struct MockCiStatus {
    projects: Mutex<Vec<CiProject>>,
}

impl MockCiStatus {
    pub fn new() -> Self {
        Self {
            projects: Mutex::new(Vec::new()),
        }
    }

    pub fn set_projects(&self, projects: Vec<CiProject>) {
        *self.projects.lock().unwrap() = projects;
    }
}

impl Default for MockCiStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CiStatus for MockCiStatus {
    async fn list_projects(&self) -> Result<Vec<CiProject>> {
        Ok(self.projects.lock().unwrap().clone())
    }
}
