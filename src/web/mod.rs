use axum::{
    Json, Router,
    extract::State,
    http::Method,
    routing::get,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::db::models::LatencyPoint;
use crate::server::connections::ConnectionRegistry;
use crate::web::error::AppError;
use crate::web::session::GatewayContext;

pub mod error;
pub mod handlers;
pub mod models;
pub mod session;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayContext>,
    pub connections: Arc<ConnectionRegistry>,
}

async fn times_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<LatencyPoint>>, AppError> {
    let points = app_state
        .gateway
        .measurements
        .recent(app_state.gateway.recent_window)
        .await?;
    Ok(Json(points))
}

async fn health_handler() -> &'static str {
    "ok"
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(handlers::websocket_handler))
        .route("/api/times", get(times_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(app_state)
}
