use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use stepgate_core::config::RouteMode;
use stepgate_core::error::StepgateError;
use stepgate_core::orchestrator::RunState;

use crate::{error::AppError, state::AppState};

/// POST /run: hand an admitted, authorized payload to the configured route.
///
/// `direct` returns the worker receipt. `orchestrated` returns the finished
/// run: `200` when it succeeded, `502` when a step failed.
pub async fn run(State(app): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let input: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("request body is not valid JSON: {e}")))?;

    match app.route {
        RouteMode::Direct => {
            let receipt = app
                .worker
                .execute(input)
                .await
                .map_err(StepgateError::from)?;
            Ok(Json(receipt).into_response())
        }
        RouteMode::Orchestrated => {
            let run = app.orchestrator.start_run(input).await?;
            let status = match run.state() {
                RunState::Failed => StatusCode::BAD_GATEWAY,
                _ => StatusCode::OK,
            };
            Ok((status, Json(run)).into_response())
        }
    }
}
