use anyhow::Result;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mergeboard::circleci::CircleCiClient;
use mergeboard::config::Config;
use mergeboard::crawl::crawl_router;
use mergeboard::dashboard::dashboard_router;
use mergeboard::github::GitHubClient;
use mergeboard::reviewer::{ApprovalProcessor, ProjectionProcessor, TrackerProcessor};
use mergeboard::store::SqliteStore;
use mergeboard::tracker::TrackerClient;
use mergeboard::webhook::webhook_router;
use mergeboard::{AppState, PullRequestQueue};

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "mergeboard"
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting pull-request review bookkeeper");

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let github = Arc::new(GitHubClient::new(config.github_token.clone()));
    let tracker = Arc::new(TrackerClient::new(
        config.tracker_token.clone(),
        config.tracker_project_id,
    ));
    let ci = Arc::new(CircleCiClient::new(config.circleci_token.clone()));

    let db_path = config.state_dir.join("mergeboard-state.db");
    info!("Using state database: {}", db_path.display());
    let store: Arc<dyn mergeboard::store::StateStore> =
        Arc::new(SqliteStore::new(&db_path).expect("Failed to initialize SQLite database"));

    // Reviewer factories run in registration order on every job execution;
    // the projection must stay last so it sees every other verdict.
    let mut queue = PullRequestQueue::new(github.clone());
    let approval_source = github.clone();
    let approval_threshold = config.approval_threshold;
    queue.add_reviewer_factory(Box::new(move |_ctx| {
        Box::new(ApprovalProcessor::new(
            approval_source.clone(),
            approval_threshold,
        ))
    }));
    let tracker_for_factory = tracker.clone();
    queue.add_reviewer_factory(Box::new(move |_ctx| {
        Box::new(TrackerProcessor::new(tracker_for_factory.clone()))
    }));
    let store_for_factory = store.clone();
    queue.add_reviewer_factory(Box::new(move |_ctx| {
        Box::new(ProjectionProcessor::new(store_for_factory.clone()))
    }));

    let app_state = Arc::new(AppState {
        queue: Arc::new(queue),
        store,
        source_control: github,
        ci,
        webhook_secret: config.github_webhook_secret.clone(),
        dashboard_org: config.dashboard_org.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(dashboard_router(app_state.clone()))
        .merge(webhook_router(app_state.clone()))
        .merge(crawl_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
