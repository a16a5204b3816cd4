use axum::{extract::State, http::HeaderMap, Json};
use stepgate_core::auth::AuthDecision;

use crate::{gate::header_pairs, state::AppState};

/// POST /authorize: the simple-authorizer response for the request's headers.
///
/// Always `200`; the decision is in the body.
pub async fn authorize(State(app): State<AppState>, headers: HeaderMap) -> Json<AuthDecision> {
    Json(app.authorizer.decision(header_pairs(&headers)))
}
