pub mod error;
pub mod gate;
pub mod routes;
pub mod state;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum Router with all routes and the gate middleware.
/// Used by [`serve_on`] and available for integration testing.
///
/// Admission runs first on every gated route; the credential check runs
/// inside it on everything except `/authorize`. `/health` is not gated.
pub fn build_router(app_state: AppState) -> Router {
    let protected = Router::new()
        .route("/run", post(routes::run::run))
        .route("/runs", get(routes::runs::list_runs))
        .route("/runs/{id}", get(routes::runs::get_run))
        .route_layer(middleware::from_fn_with_state(
            app_state.authorizer.clone(),
            gate::require_credential,
        ));

    let gated = protected
        .route("/authorize", post(routes::authorize::authorize))
        .route_layer(middleware::from_fn_with_state(
            app_state.gate.clone(),
            gate::admit,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the ingress server on a pre-bound listener.
///
/// The caller binds, so it can read the actual port before starting (useful
/// when binding port 0).
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    app_state: AppState,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let budget = app_state.gate.budget();
    tracing::info!(
        %addr,
        route = app_state.route.as_str(),
        steady_rate = budget.steady_rate,
        burst_capacity = budget.burst_capacity,
        "stepgate listening"
    );

    let app = build_router(app_state);
    axum::serve(listener, app).await?;
    Ok(())
}
