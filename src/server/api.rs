use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::registry::SessionId;
use crate::rtsp;
use crate::{CameraSlots, Layout, Position, WallError};

use super::http::AppState;
use super::sse::notify_error;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(value: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn error(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "error": message.into() })))
}

fn from_wall_error(e: WallError) -> ApiResponse {
    match e {
        WallError::Registry(msg) => error(StatusCode::NOT_FOUND, msg),
        WallError::Config(msg) => error(StatusCode::BAD_REQUEST, msg),
        WallError::Scene(msg) if msg.contains("not found") => {
            error(StatusCode::NOT_FOUND, msg)
        }
        other => {
            notify_error(other.to_string());
            error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

pub async fn get_status(State(state): State<AppState>) -> ApiResponse {
    let screens = state.registry.read().await.count();
    ok(json!({
        "screens_connected": screens,
        "cameras_configured": state.cameras.len(),
        "started_at": state.started_at,
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}

pub async fn list_cameras(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.cameras.all()))
}

pub async fn list_screens(State(state): State<AppState>) -> Json<serde_json::Value> {
    let screens = state.registry.read().await.nodes();
    Json(json!(screens))
}

#[derive(Debug, Deserialize)]
pub struct ScreenConfigRequest {
    layout: String,
    #[serde(default)]
    cameras: CameraSlots,
}

pub async fn update_screen_config(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ScreenConfigRequest>,
) -> ApiResponse {
    if !state.registry.read().await.contains(session_id) {
        return error(StatusCode::NOT_FOUND, "Screen not found");
    }

    let layout: Layout = match request.layout.parse() {
        Ok(layout) => layout,
        Err(_) => return error(StatusCode::BAD_REQUEST, "Invalid layout"),
    };

    info!("Configuring screen {}: layout {}", session_id, layout);

    match state
        .controller
        .set_screen_config(session_id, layout, request.cameras)
        .await
    {
        Ok(()) => ok(json!({ "status": "success" })),
        Err(e) => from_wall_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PositionsRequest {
    #[serde(default)]
    positions: HashMap<SessionId, Position>,
}

pub async fn update_screen_positions(
    State(state): State<AppState>,
    Json(request): Json<PositionsRequest>,
) -> ApiResponse {
    let groups = state.controller.update_positions(request.positions).await;
    ok(json!({ "status": "success", "groups": groups }))
}

#[derive(Debug, Deserialize)]
pub struct StreamUrlQuery {
    #[serde(default)]
    layout: Option<String>,
}

pub async fn get_stream_url(
    State(state): State<AppState>,
    Path(camera_id): Path<u32>,
    Query(query): Query<StreamUrlQuery>,
) -> ApiResponse {
    let layout: Layout = match query.layout.as_deref() {
        None => Layout::TwoByTwo,
        Some(raw) => match raw.parse() {
            Ok(layout) => layout,
            Err(_) => return error(StatusCode::BAD_REQUEST, "Invalid layout"),
        },
    };

    match state.cameras.get(camera_id) {
        Some(camera) => ok(json!({ "url": rtsp::stream_url(camera, layout) })),
        None => error(StatusCode::NOT_FOUND, "Camera not found"),
    }
}

pub async fn list_scenes(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.controller.list_scenes().await))
}

#[derive(Debug, Deserialize)]
pub struct CreateSceneRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    screen_positions: Option<HashMap<SessionId, Position>>,
}

pub async fn create_scene(
    State(state): State<AppState>,
    Json(request): Json<CreateSceneRequest>,
) -> ApiResponse {
    let name = request.name.unwrap_or_else(|| "New scene".to_string());
    match state
        .controller
        .create_scene(
            name,
            request.description.unwrap_or_default(),
            request.screen_positions,
        )
        .await
    {
        Ok(scene) => ok(json!(scene)),
        Err(e) => from_wall_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSceneRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

pub async fn update_scene(
    State(state): State<AppState>,
    Path(scene_id): Path<String>,
    Json(request): Json<UpdateSceneRequest>,
) -> ApiResponse {
    match state
        .controller
        .update_scene(&scene_id, request.name, request.description)
        .await
    {
        Ok(scene) => ok(json!(scene)),
        Err(e) => from_wall_error(e),
    }
}

pub async fn delete_scene(
    State(state): State<AppState>,
    Path(scene_id): Path<String>,
) -> ApiResponse {
    match state.controller.delete_scene(&scene_id).await {
        Ok(()) => ok(json!({ "status": "success" })),
        Err(e) => from_wall_error(e),
    }
}

pub async fn apply_scene(
    State(state): State<AppState>,
    Path(scene_id): Path<String>,
) -> ApiResponse {
    match state.controller.apply_scene(&scene_id).await {
        Ok(outcome) => ok(json!({
            "status": "success",
            "applied_screens": outcome.applied,
            "screen_positions": outcome.positions,
        })),
        Err(e) => from_wall_error(e),
    }
}
