//! Observer API — Axum web server for dashboards and indexers.
//!
//! Serves read endpoints over the vault's state plus the boundary
//! operations (deposit, withdraw, rebalance, threshold update) as JSON.
//! CORS enabled for local development.

pub mod routes;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::ApiState;

/// Start the API web server.
///
/// This spawns a background task — it doesn't block.
pub fn spawn_api(state: ApiState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "API server starting on http://localhost:{port}");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind API port");

        axum::serve(listener, app)
            .await
            .expect("API server error");
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/yields", get(routes::get_yields))
        .route("/api/allocations", get(routes::get_allocations))
        .route("/api/events", get(routes::get_events))
        .route("/api/deposit", post(routes::post_deposit))
        .route("/api/withdraw", post(routes::post_withdraw))
        .route("/api/rebalance", post(routes::post_rebalance))
        .route("/api/policy/threshold", post(routes::post_threshold))
        .layer(cors)
        .with_state(state)
}
