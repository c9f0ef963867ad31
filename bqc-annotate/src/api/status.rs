//! Review progress as JSON

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::ApiResult;
use crate::queue::{self, Progress};
use crate::AppState;

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub phase: String,
    #[serde(flatten)]
    pub progress: Progress,
    /// Scan path of the first unrated item, if any
    pub next: Option<String>,
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let items = state.items().await;
    let snapshot = state.snapshot().await?;
    Ok(Json(StatusResponse {
        phase: state.phase().as_str().to_string(),
        progress: queue::progress(&items, &snapshot),
        next: queue::first_unrated(&items, &snapshot).map(|i| i.item.key.scan.clone()),
    }))
}
