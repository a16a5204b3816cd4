use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

fn parse_run_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::bad_request(format!("invalid run id '{id}'")))
}

/// GET /runs: every recorded run, newest first.
pub async fn list_runs(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let orchestrator = app.orchestrator.clone();
    let runs = tokio::task::spawn_blocking(move || orchestrator.list_runs())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::to_value(runs)?))
}

/// GET /runs/{id}: one run snapshot.
pub async fn get_run(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_run_id(&id)?;
    let orchestrator = app.orchestrator.clone();
    let run = tokio::task::spawn_blocking(move || orchestrator.get_run(id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::to_value(run)?))
}
