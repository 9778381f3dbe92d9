use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cameras::CameraStore;
use crate::controller::Controller;
use crate::registry::Registry;
use crate::scenes::SceneStore;
use crate::{Result, WallError};

use super::api;
use super::sse::sse_handler;
use super::ws::ws_handler;

pub struct HttpServer {
    pub registry: Arc<RwLock<Registry>>,
    pub cameras: Arc<CameraStore>,
    pub controller: Arc<Controller>,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<Registry>>,
    pub cameras: Arc<CameraStore>,
    pub controller: Arc<Controller>,
    pub started_at: DateTime<Utc>,
}

impl HttpServer {
    pub fn new(cameras: CameraStore, scenes: SceneStore) -> Self {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let scenes = Arc::new(RwLock::new(scenes));
        let controller = Arc::new(Controller::new(Arc::clone(&registry), scenes));

        Self {
            registry,
            cameras: Arc::new(cameras),
            controller,
            started_at: Utc::now(),
        }
    }

    pub async fn run(self, port: u16) -> Result<()> {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            cameras: Arc::clone(&self.cameras),
            controller: Arc::clone(&self.controller),
            started_at: self.started_at,
        };

        let app = Router::new()
            .route("/health", get(health_check))

            // Display-node control channel and operator event stream
            .route("/ws", get(ws_handler))
            .route("/events", get(sse_handler))

            .route("/api/status", get(api::get_status))
            .route("/api/cameras", get(api::list_cameras))
            .route("/api/screens", get(api::list_screens))
            .route("/api/screen/:id/config", post(api::update_screen_config))
            .route("/api/screens/positions", post(api::update_screen_positions))
            .route("/api/rtsp/:id", get(api::get_stream_url))
            .route("/api/scenes", get(api::list_scenes).post(api::create_scene))
            .route(
                "/api/scenes/:id",
                axum::routing::put(api::update_scene).delete(api::delete_scene),
            )
            .route("/api/scenes/:id/apply", post(api::apply_scene))

            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        info!("Wallcast server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| WallError::Network(format!("Failed to bind to port {}: {}", port, e)))?;

        axum::serve(listener, app)
            .await
            .map_err(|e| WallError::Network(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "wallcast",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
