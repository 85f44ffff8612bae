//! REST API handlers

use adbridge_core::{BridgeError, DeviceId, Session};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Negotiated session details for `GET /device/{serial}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub max_payload_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub features: Vec<String>,
}

impl From<&Session> for DeviceInfo {
    fn from(session: &Session) -> Self {
        Self {
            max_payload_size: session.max_payload_size,
            product: session.banner.product.clone(),
            model: session.banner.model.clone(),
            device: session.banner.device.clone(),
            features: session.banner.features.clone(),
        }
    }
}

/// HTTP status a failed session request is reported with
pub fn status_for(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
        BridgeError::DeviceNotFound(_) | BridgeError::AuthenticationFailed { .. } => {
            StatusCode::UNAUTHORIZED
        }
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(error: &BridgeError) -> Response {
    (status_for(error), Json(ApiError::new(error.to_string()))).into_response()
}

/// Establish (or reuse) the session for a device and describe it
pub async fn device_info(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> Response {
    if serial.trim().is_empty() {
        return missing_serial().await;
    }
    let serial = DeviceId::new(serial);

    match state.registry.get_or_create(&serial).await {
        Ok(session) => Json(DeviceInfo::from(session.as_ref())).into_response(),
        Err(e) => {
            warn!(serial = %serial, error = %e, "Device info request failed");
            error_response(&e)
        }
    }
}

/// `/device` without a serial
pub async fn missing_serial() -> Response {
    error_response(&BridgeError::ProtocolViolation(
        "missing device serial".to_string(),
    ))
}

/// Anything no route matched
pub async fn not_found(uri: axum::http::Uri) -> Response {
    debug!(path = %uri.path(), "No route");
    (StatusCode::NOT_FOUND, Json(ApiError::new("Not found"))).into_response()
}
