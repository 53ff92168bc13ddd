/**
 * Root HTTP surface.
 *
 * Clients pull with `GET /api/v1/commands?id=<name>`, push their whole table
 * with `POST /api/v1/commands`, forward device changes with
 * `POST /api/v1/devices` and announce themselves on `/api/v1/register`.
 * Operators use the same routes to insert, query and delete commands.
 *
 * Every route except /health requires the x-api-key header.
 */

use crate::health::{HealthTracker, KernelHealth};
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use netfleet_core::wire::{self, CommandTable, DeviceTable};
use netfleet_core::{ClientInfo, ClientRegistration, CommandKey, FleetError, RootSync};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub sync: RootSync,
    pub health_tracker: HealthTracker,
    pub api_key: Arc<String>,
}

#[derive(Debug, Deserialize)]
struct CommandsParams {
    id: Option<String>,
    cmd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevicesParams {
    dev: Option<String>,
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    if app.api_key.is_empty() {
        warn!("NETFLEET_API_KEY not set, API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == app.api_key.as_str())
        .unwrap_or(false);

    if !ok {
        debug!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route(
            "/api/v1/commands",
            get(get_commands).post(post_commands).delete(delete_command),
        )
        .route("/api/v1/devices", get(get_devices).post(post_devices))
        .route("/api/v1/register", post(register))
        .route("/api/v1/clients", get(list_clients))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.sync))
}

// GET /api/v1/commands?id=<client> (pull) or ?cmd=all|<key> (query)
async fn get_commands(
    State(app): State<AppState>,
    Query(params): Query<CommandsParams>,
) -> Result<Json<CommandTable>, StatusCode> {
    if let Some(client) = params.id.filter(|id| !id.is_empty()) {
        let records = app.sync.serve_pull(&client);
        return Ok(Json(wire::encode_commands(&records)));
    }

    match params.cmd.as_deref() {
        None | Some("") | Some("all") => {
            let table = app.sync.queue().snapshot();
            Ok(Json(wire::encode_commands(table.values())))
        }
        Some(key) => {
            let record = app.sync.queue().get(&CommandKey::parse(key)).ok_or(StatusCode::NOT_FOUND)?;
            Ok(Json(wire::encode_commands([&record])))
        }
    }
}

// POST /api/v1/commands (operator inserts and client pushes)
async fn post_commands(
    State(app): State<AppState>,
    Json(table): Json<CommandTable>,
) -> Json<serde_json::Value> {
    let offered = table.len();
    let accepted = app.sync.accept(wire::decode_commands(table)).await;
    Json(serde_json::json!({ "offered": offered, "accepted": accepted }))
}

// DELETE /api/v1/commands?cmd=<key>
async fn delete_command(
    State(app): State<AppState>,
    Query(params): Query<CommandsParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let key = params.cmd.filter(|cmd| !cmd.is_empty()).ok_or(StatusCode::BAD_REQUEST)?;
    match app.sync.queue().delete(&CommandKey::parse(&key)) {
        Ok(_) => Ok(Json(serde_json::json!({ "deleted": key }))),
        Err(FleetError::NotFound { .. }) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// GET /api/v1/devices[?dev=<mac|ip>]
async fn get_devices(
    State(app): State<AppState>,
    Query(params): Query<DevicesParams>,
) -> Result<Json<DeviceTable>, StatusCode> {
    match params.dev.filter(|dev| !dev.is_empty()) {
        Some(dev) => {
            let device = app.sync.devices().find(&dev).map_err(|_| StatusCode::NOT_FOUND)?;
            Ok(Json(wire::encode_devices([&device])))
        }
        None => {
            let devices = app.sync.devices().snapshot();
            Ok(Json(wire::encode_devices(devices.values())))
        }
    }
}

// POST /api/v1/devices (client device changes)
async fn post_devices(
    State(app): State<AppState>,
    Json(table): Json<DeviceTable>,
) -> Json<serde_json::Value> {
    let offered = table.len();
    let accepted = app.sync.accept_devices(table.into_values().collect());
    Json(serde_json::json!({ "offered": offered, "accepted": accepted }))
}

// POST /api/v1/register
async fn register(
    State(app): State<AppState>,
    Json(info): Json<ClientInfo>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if info.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let name = info.name.clone();
    let first = app.sync.register(info);
    Ok(Json(serde_json::json!({ "registered": name, "first": first })))
}

// GET /api/v1/clients
async fn list_clients(State(app): State<AppState>) -> Json<Vec<ClientRegistration>> {
    Json(app.sync.clients().list())
}
