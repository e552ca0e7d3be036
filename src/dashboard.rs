//! Dashboard rendering: the read-only view over the shared store plus live
//! CI build status.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::circleci::{CiProject, RecentBuild};
use crate::github::PrLifecycle;
use crate::store::{CrawlState, PrRecord};
use crate::AppState;

/// Which branch's latest build represents a project on the dashboard.
const BRANCH_PRIORITY: &[&str] = &["integration", "develop", "master"];

/// Records grouped by lifecycle state, the shape the page renders.
#[derive(Debug, Default, Serialize)]
pub struct QueueView {
    pub open: Vec<PrRecord>,
    pub merged: Vec<PrRecord>,
    pub closed: Vec<PrRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStatus {
    pub slug: String,
    pub project_url: String,
    pub build_url: String,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct DashboardData {
    pub queue: QueueView,
    pub last_run: Option<String>,
    pub is_running: bool,
    pub build_status: Vec<BuildStatus>,
}

pub fn group_records(records: Vec<PrRecord>) -> QueueView {
    let mut view = QueueView::default();
    for record in records {
        match record.state {
            PrLifecycle::Open => view.open.push(record),
            PrLifecycle::Merged => view.merged.push(record),
            PrLifecycle::Closed => view.closed.push(record),
        }
    }
    for group in [&mut view.open, &mut view.merged, &mut view.closed] {
        group.sort_by(|a, b| (&a.owner, &a.repo, a.number).cmp(&(&b.owner, &b.repo, b.number)));
    }
    view
}

fn select_build(project: &CiProject) -> Option<&RecentBuild> {
    BRANCH_PRIORITY.iter().find_map(|branch| {
        project
            .branches
            .get(*branch)
            .and_then(|info| info.recent_builds.first())
    })
}

/// Build-status rows for the configured organization's projects.
pub fn build_statuses(org: &str, projects: &[CiProject]) -> Vec<BuildStatus> {
    let org_marker = format!("/{}/", org);

    projects
        .iter()
        .filter(|project| project.vcs_url.contains(&org_marker))
        .filter_map(|project| {
            select_build(project).map(|build| BuildStatus {
                slug: format!("{}/{}", org, project.reponame),
                project_url: format!("https://circleci.com/gh/{}/{}", org, project.reponame),
                build_url: format!(
                    "https://circleci.com/gh/{}/{}/{}",
                    org, project.reponame, build.build_num
                ),
                state: build
                    .outcome
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            })
        })
        .collect()
}

impl DashboardData {
    pub fn assemble(
        records: Vec<PrRecord>,
        crawl: CrawlState,
        build_status: Vec<BuildStatus>,
    ) -> Self {
        Self {
            queue: group_records(records),
            last_run: crawl
                .last_run
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            is_running: crawl.running,
            build_status,
        }
    }
}

fn render_dashboard_html(data: &DashboardData) -> String {
    const DASHBOARD_HTML_TEMPLATE: &str = include_str!("dashboard.html");

    let queue_json = serde_json::to_string(&data.queue).unwrap_or_else(|_| "{}".to_string());
    let builds_json =
        serde_json::to_string(&data.build_status).unwrap_or_else(|_| "[]".to_string());

    DASHBOARD_HTML_TEMPLATE
        .replace("{queue_json}", &queue_json)
        .replace("{builds_json}", &builds_json)
        .replace("{last_run}", data.last_run.as_deref().unwrap_or("never"))
        .replace(
            "{is_running}",
            if data.is_running { "running" } else { "idle" },
        )
}

pub async fn dashboard_handler(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let records = match state.store.all_records().await {
        Ok(records) => records,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("store unavailable: {}", e),
            )
                .into_response()
        }
    };

    let crawl = match state.store.crawl_state().await {
        Ok(crawl) => crawl,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("store unavailable: {}", e),
            )
                .into_response()
        }
    };

    // CI status is decoration; a CI outage must not take the dashboard down.
    let projects = match state.ci.list_projects().await {
        Ok(projects) => projects,
        Err(e) => {
            warn!("CI project listing failed: {:#}", e);
            Vec::new()
        }
    };

    let data = DashboardData::assemble(
        records,
        crawl,
        build_statuses(&state.dashboard_org, &projects),
    );

    let accept = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if accept.to_lowercase().contains("application/json") {
        return Json(data).into_response();
    }

    Html(render_dashboard_html(&data)).into_response()
}

pub fn dashboard_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .with_state(state)
}
