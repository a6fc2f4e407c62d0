//! `GET /health`.
//!
//! Answers 200 whenever the process is up, including when the startup
//! connectivity check failed; the body says which.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::watch;

use vaultindex_core::indexer::{IndexerState, IndexerStatus};

#[derive(Clone)]
pub struct HealthState {
    status: watch::Receiver<IndexerStatus>,
    mode: String,
}

impl HealthState {
    pub fn new(status: watch::Receiver<IndexerStatus>, mode: impl Into<String>) -> Self {
        Self {
            status,
            mode: mode.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: String,
    pub state: IndexerState,
    pub connected: bool,
    pub cursor: Option<u64>,
    pub head: Option<u64>,
    pub cycles: u64,
    pub failed_writes: u64,
    pub last_error: Option<String>,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

fn describe(status: &IndexerStatus) -> String {
    match status.state {
        IndexerState::Starting => "Oracle is starting.".to_string(),
        IndexerState::Disconnected => "Oracle is not connected to the blockchain.".to_string(),
        IndexerState::Stopped => "Oracle has stopped.".to_string(),
        IndexerState::ErrorBackoff => {
            "Oracle is running, retrying after a failed poll.".to_string()
        }
        _ => "Oracle is running, watching the blockchain.".to_string(),
    }
}

impl HealthResponse {
    fn from_status(status: IndexerStatus, mode: String) -> Self {
        Self {
            status: describe(&status),
            mode,
            state: status.state,
            connected: status.connected,
            cursor: status.cursor,
            head: status.head,
            cycles: status.cycles,
            failed_writes: status.failed_writes,
            last_error: status.last_error,
        }
    }
}

pub async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    let status = state.status.borrow().clone();
    Json(HealthResponse::from_status(status, state.mode))
}
