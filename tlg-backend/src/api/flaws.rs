//! Filter listing

use axum::{extract::State, Json};
use serde_json::Value;

use crate::AppState;

/// GET /flaws
///
/// `{shortname: {group, label, description}}` for every registered filter.
pub async fn list_flaws(State(state): State<AppState>) -> Json<Value> {
    Json(state.orchestrator.registry().describe_json())
}
