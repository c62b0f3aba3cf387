//! Defines the Axum API routes and handlers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::Value;

use crate::error::HubError;
use crate::registry::PrinterRegistry;
use crate::web::models::{RunMacroRequest, SetTemperatureRequest};
use crate::web::relay::ws_handler;

pub type AppState = Arc<PrinterRegistry>;

/// Helper to create a JSON error response with a message and status code
fn json_error(message: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn error_response(error: HubError) -> axum::response::Response {
    let status = match &error {
        HubError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        HubError::NotFound(_) => StatusCode::NOT_FOUND,
        HubError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        HubError::Upstream(_) | HubError::Rpc(_) => StatusCode::BAD_GATEWAY,
    };
    json_error(&error.to_string(), status)
}

fn command_response(outcome: Result<Value, HubError>) -> axum::response::Response {
    match outcome {
        Ok(result) => (StatusCode::OK, Json(serde_json::json!({ "result": result }))).into_response(),
        Err(e) => error_response(e),
    }
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(registry: AppState) -> Router {
    Router::new()
        .route("/api/v1/printers", get(list_printers))
        .route("/api/v1/printers/{key}", get(get_printer))
        .route("/api/v1/printers/{key}/job", get(get_job))
        .route("/api/v1/printers/{key}/temperature", post(set_temperature))
        .route("/api/v1/printers/{key}/macro", post(run_macro))
        .route("/api/v1/printers/{key}/{action}", post(printer_action))
        .route("/printers/{key}/thumbnail/{*path}", get(get_thumbnail))
        .route("/ws", get(ws_handler))
        .with_state(registry)
}

/// GET /api/v1/printers
async fn list_printers(State(registry): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(registry.snapshots())).into_response()
}

/// GET /api/v1/printers/{key}
async fn get_printer(State(registry): State<AppState>, Path(key): Path<String>) -> axum::response::Response {
    match registry.snapshot(&key) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/printers/{key}/job -- `null` when no file is loaded
async fn get_job(State(registry): State<AppState>, Path(key): Path<String>) -> axum::response::Response {
    match registry.job_estimate(&key) {
        Ok(estimate) => (StatusCode::OK, Json(estimate)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/printers/{key}/{action}
async fn printer_action(
    State(registry): State<AppState>,
    Path((key, action)): Path<(String, String)>,
) -> axum::response::Response {
    let outcome = match action.as_str() {
        "pause" => registry.pause(&key).await,
        "resume" => registry.resume(&key).await,
        "cancel" => registry.cancel(&key).await,
        "emergency_stop" => registry.emergency_stop(&key).await,
        "firmware_restart" => registry.firmware_restart(&key).await,
        "klipper_restart" => registry.klipper_restart(&key).await,
        "turn_on" => registry.turn_on(&key).await,
        "turn_off" => registry.turn_off(&key).await,
        _ => return json_error(&format!("Unknown action '{}'", action), StatusCode::NOT_FOUND),
    };
    command_response(outcome)
}

/// POST /api/v1/printers/{key}/temperature
async fn set_temperature(
    State(registry): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<SetTemperatureRequest>,
) -> axum::response::Response {
    if let Err(e) = registry.get(&key) {
        return error_response(e);
    }
    let value = match payload.target() {
        Ok(value) => value,
        Err(e) => return error_response(e),
    };
    command_response(registry.set_temperature(&key, &payload.heater, value).await)
}

/// POST /api/v1/printers/{key}/macro
async fn run_macro(
    State(registry): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<RunMacroRequest>,
) -> axum::response::Response {
    command_response(registry.run_macro(&key, &payload.macro_id).await)
}

/// GET /printers/{key}/thumbnail/{*path}
async fn get_thumbnail(
    State(registry): State<AppState>,
    Path((key, path)): Path<(String, String)>,
) -> axum::response::Response {
    match registry.fetch_thumbnail(&key, &path).await {
        Ok(bytes) => {
            let content_type = if path.ends_with(".jpg") || path.ends_with(".jpeg") {
                "image/jpeg"
            } else {
                "image/png"
            };
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(HubError::Upstream(e)) => {
            tracing::error!("Thumbnail {} for {} unavailable: {}", path, key, e);
            json_error("Thumbnail unavailable", StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(e) => error_response(e),
    }
}
