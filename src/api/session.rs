//! Session commands: start a return, inject a credential

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::actuators::{Pattern, play_best_effort};
use crate::session::StartOutcome;

/// Inbound command envelope (`{"command": "start", "requestId": ".."}`)
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Start request query string
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuery {
    pub request_id: Option<String>,
}

/// Reply to a start request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// `ok`, `waiting`, `busy` or `error`
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    pub credential: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub accepted: bool,
}

/// `GET|POST /return_start`
///
/// The request id comes from the JSON body if present, else `?requestId=`.
async fn return_start(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<StartQuery>,
    body: Bytes,
) -> (StatusCode, Json<StartResponse>) {
    let command = if body.is_empty() {
        CommandRequest::default()
    } else {
        match serde_json::from_slice::<CommandRequest>(&body) {
            Ok(command) => command,
            Err(e) => return bad_request(&format!("invalid JSON body: {e}")),
        }
    };

    let request_id = command.request_id.or(query.request_id);
    (StatusCode::OK, Json(start(&state, request_id)))
}

/// `POST /command`
async fn command(
    State(state): State<Arc<ApiState>>,
    Json(command): Json<CommandRequest>,
) -> (StatusCode, Json<StartResponse>) {
    match command.command.as_deref() {
        Some("start") => (StatusCode::OK, Json(start(&state, command.request_id))),
        Some(other) => bad_request(&format!("unknown command: {other}")),
        None => bad_request("missing command"),
    }
}

/// `POST /credential`
async fn credential(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CredentialRequest>,
) -> Json<CredentialResponse> {
    let accepted = state.gate.observe(&request.credential).await;
    Json(CredentialResponse { accepted })
}

fn start(state: &ApiState, request_id: Option<String>) -> StartResponse {
    match state.session.try_start(request_id) {
        StartOutcome::Accepted { request_id, .. } => {
            // Prompt plays in the background so the reply is not delayed
            let sound = Arc::clone(&state.sound);
            tokio::spawn(async move { play_best_effort(sound.as_ref(), Pattern::Prompt).await });

            StartResponse {
                status: "ok".to_string(),
                message: "tap your tag on the reader".to_string(),
                request_id: Some(request_id),
            }
        }
        StartOutcome::AlreadyWaiting => StartResponse {
            status: "waiting".to_string(),
            message: "already waiting for a tag".to_string(),
            request_id: None,
        },
        StartOutcome::Busy => StartResponse {
            status: "busy".to_string(),
            message: "a return is in progress".to_string(),
            request_id: None,
        },
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<StartResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(StartResponse {
            status: "error".to_string(),
            message: message.to_string(),
            request_id: None,
        }),
    )
}

/// Build session command router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/return_start", get(return_start).post(return_start))
        .route("/command", post(command))
        .route("/credential", post(credential))
        .with_state(state)
}
