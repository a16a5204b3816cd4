use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use stepgate_core::admission::AdmissionGate;
use stepgate_core::auth::Authorizer;
use tracing::warn;

use crate::error::Rejection;

/// Header pairs as strings. A value that isn't valid UTF-8 is presented as
/// empty, which the authorizer denies.
pub fn header_pairs(headers: &HeaderMap) -> impl Iterator<Item = (&str, &str)> {
    headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("")))
}

/// Outermost middleware: debit one admission token or shed the request.
///
/// Tokens are never refunded, whatever happens downstream.
pub async fn admit(State(gate): State<Arc<AdmissionGate>>, req: Request, next: Next) -> Response {
    if gate.try_admit() {
        return next.run(req).await;
    }
    warn!(path = %req.uri().path(), "admission denied: rate budget exhausted");
    Rejection::AdmissionDenied.into_response()
}

/// Runs inside [`admit`]: reject requests without the shared credential.
pub async fn require_credential(
    State(authorizer): State<Arc<Authorizer>>,
    req: Request,
    next: Next,
) -> Response {
    if authorizer.authorize(header_pairs(req.headers())) {
        return next.run(req).await;
    }
    // Never log the presented value.
    warn!(
        path = %req.uri().path(),
        header = authorizer.credential_header(),
        "authorization denied"
    );
    Rejection::AuthDenied.into_response()
}
