//! Full-repository crawl: the catch-up path for pull requests that produced
//! no webhook (e.g. after downtime).
//!
//! Enumerates every team the authenticated actor belongs to, then every
//! repository owned by each team, and enqueues a repository scan for each.
//! Enumeration failures are isolated per team; one bad team never stops the
//! others.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::queue::ReviewTarget;
use crate::AppState;

/// Run one crawl: returns the number of repository scans enqueued.
///
/// Concurrent crawls are not deduplicated; the `running` flag is advisory
/// display state for the dashboard.
pub async fn run_crawl(state: &AppState) -> usize {
    if let Err(e) = state.store.set_crawl_running(true).await {
        error!("Failed to mark crawl as running: {}", e);
    }

    let mut enqueued = 0;

    match state.source_control.list_teams().await {
        Ok(teams) => {
            info!("Crawling repositories across {} teams", teams.len());
            for team in teams {
                let repos = match state.source_control.list_team_repos(team.id).await {
                    Ok(repos) => repos,
                    Err(e) => {
                        warn!(
                            "Skipping team {} ({}): repository listing failed: {:#}",
                            team.name, team.id, e
                        );
                        continue;
                    }
                };

                for repo in repos {
                    state
                        .queue
                        .enqueue(&repo.owner, &repo.name, ReviewTarget::RepoScan)
                        .await;
                    enqueued += 1;
                }
            }
        }
        Err(e) => {
            error!("Team enumeration failed, crawl found nothing: {:#}", e);
        }
    }

    if let Err(e) = state.store.finish_crawl(Utc::now()).await {
        error!("Failed to record crawl completion: {}", e);
    }

    info!("Crawl enqueued {} repository scans", enqueued);
    enqueued
}

pub async fn crawl_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    run_crawl(&state).await;
    (StatusCode::OK, "Running crawler on repos!")
}

pub fn crawl_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/crawl", get(crawl_handler))
        .with_state(state)
}
