//! Loopback control bridge
//!
//! Serves the viewer page and mediates its joystick input to the command
//! broadcaster and the device-management API. Bound to loopback only; the
//! permissive CORS layer exists for viewer pages opened from `file://`.

pub mod handlers;
pub mod viewer;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::viewer_page))
        .route("/viewer", get(handlers::viewer_page))
        .route("/control", post(handlers::control))
        .route("/enter-control", post(handlers::enter_control))
        .route("/exit-control", post(handlers::exit_control))
        .route("/go-home", post(handlers::go_home))
        .fallback(handlers::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the bridge until a shutdown signal arrives
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], state.config.control_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Control bridge listening on http://{}", addr);

    let mut shutdown = state.shutdown_tx.subscribe();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
