//! Event ingress: maps GitHub webhook deliveries onto queue enqueues.
//!
//! Every known delivery is acknowledged with 200 and a short plaintext
//! body; webhooks are fire-and-forget, so processing failures never
//! propagate back to the sender. Signature verification runs only when a
//! webhook secret is configured.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::ReviewTarget;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequestEvent>,
    pub repository: Option<Repository>,
    pub issue: Option<Issue>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub number: u64,
    pub base: Option<BaseRef>,
}

/// Base side of a PR event; carries the repository the PR targets, which is
/// the repository the review job should run against.
#[derive(Debug, Deserialize)]
pub struct BaseRef {
    pub repo: Option<Repository>,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: Owner,
}

#[derive(Debug, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct Issue {
    pub number: u64,
}

/// What a delivery maps to.
#[derive(Debug, PartialEq, Eq)]
pub enum HookDisposition {
    Enqueue {
        owner: String,
        repo: String,
        target: ReviewTarget,
        ack: &'static str,
    },
    /// Known event kind, nothing to enqueue.
    Acknowledge(&'static str),
    /// Unknown event kind; the handler echoes the payload back.
    Unknown,
}

const PR_ACTIONS_OF_INTEREST: &[&str] = &["opened", "reopened", "closed"];

/// Pure mapping from an event kind + payload to a disposition.
pub fn map_event(event: &str, payload: &WebhookPayload) -> HookDisposition {
    match event {
        "status" | "push" => match &payload.repository {
            Some(repo) => HookDisposition::Enqueue {
                owner: repo.owner.login.clone(),
                repo: repo.name.clone(),
                target: ReviewTarget::RepoScan,
                ack: "Reviewing",
            },
            None => HookDisposition::Acknowledge("Ignoring event without repository"),
        },
        "issue_comment" => match (&payload.repository, &payload.issue) {
            (Some(repo), Some(issue)) => HookDisposition::Enqueue {
                owner: repo.owner.login.clone(),
                repo: repo.name.clone(),
                target: ReviewTarget::Pull(issue.number),
                ack: "Reviewing",
            },
            _ => HookDisposition::Acknowledge("Ignoring comment event without issue"),
        },
        "pull_request" => {
            let interesting = payload
                .action
                .as_deref()
                .is_some_and(|action| PR_ACTIONS_OF_INTEREST.contains(&action));
            if !interesting {
                return HookDisposition::Acknowledge("Handling pull request");
            }

            let pr = match &payload.pull_request {
                Some(pr) => pr,
                None => return HookDisposition::Acknowledge("Handling pull request"),
            };

            // The base repository is authoritative for PR events; fall back
            // to the delivery's top-level repository.
            let repo = pr
                .base
                .as_ref()
                .and_then(|base| base.repo.as_ref())
                .or(payload.repository.as_ref());

            match repo {
                Some(repo) => HookDisposition::Enqueue {
                    owner: repo.owner.login.clone(),
                    repo: repo.name.clone(),
                    target: ReviewTarget::Pull(pr.number),
                    ack: "Handling pull request",
                },
                None => HookDisposition::Acknowledge("Handling pull request"),
            }
        }
        _ => HookDisposition::Unknown,
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Constant-time verification of GitHub's `sha256=<hex>` signature header.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);
    mac.verify_slice(&signature_bytes).is_ok()
}

pub async fn github_hook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery_id = Uuid::new_v4();

    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|h| h.to_str().ok());
        let verified = signature.is_some_and(|sig| verify_signature(secret, &body, sig));
        if !verified {
            warn!("Rejected webhook delivery {} with bad signature", delivery_id);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let event = headers
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    info!("Handling github hook {} (delivery {})", event, delivery_id);

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Malformed webhook payload on delivery {}: {}", delivery_id, e);
            return (StatusCode::OK, format!("Ignoring malformed payload: {}", e))
                .into_response();
        }
    };

    match map_event(event, &payload) {
        HookDisposition::Enqueue {
            owner,
            repo,
            target,
            ack,
        } => {
            state.queue.enqueue(&owner, &repo, target).await;
            (StatusCode::OK, ack).into_response()
        }
        HookDisposition::Acknowledge(message) => (StatusCode::OK, message).into_response(),
        HookDisposition::Unknown => (
            StatusCode::OK,
            format!("Unknown event: {}", String::from_utf8_lossy(&body)),
        )
            .into_response(),
    }
}

pub fn webhook_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/github-hook", post(github_hook_handler))
        .with_state(state)
}
