//! Server — Axum trigger surface for settlement runs.
//!
//! On-demand settlement per user, the admin sweep and override, bankroll
//! reads and the recent-run log. CORS enabled for the web front end.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::{AppState, ServerState};

/// Bind `port` and serve the API on a background task.
pub async fn spawn_server(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind server port {port}"))?;
    info!(port, "Server listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(routes::ADMIN_HEADER),
        ]);

    Router::new()
        .route("/api/users/:user/settle", post(routes::settle_user))
        .route("/api/users/:user/bankroll", get(routes::get_bankroll))
        .route(
            "/api/users/:user/bankroll/history",
            get(routes::get_bankroll_history),
        )
        .route("/api/settle-all", post(routes::settle_all))
        .route(
            "/api/admin/users/:user/wagers/:wager/settle",
            post(routes::override_wager),
        )
        .route("/api/runs", get(routes::get_runs))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
