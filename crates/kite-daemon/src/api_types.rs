//! Response envelope and error mapping.
//!
//! Every endpoint returns `{ "success": true, "data": ... }` or
//! `{ "success": false, "error": ..., "kind": ... }`; the HTTP status
//! mirrors the envelope (4xx caller, 5xx engine/adapter).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use kite_domain::EngineError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub kind: String,
}

/// Success envelope with 200.
pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Envelope { success: true, data })).into_response()
}

/// Error envelope; status from the error kind.
pub fn fail(err: EngineError) -> Response {
    let status = match &err {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorEnvelope {
            success: false,
            error: err.to_string(),
            kind: err.kind().to_string(),
        }),
    )
        .into_response()
}

/// Adapter failures (sqlx, anyhow) surface as 500 with a generic kind.
pub fn fail_internal(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorEnvelope {
            success: false,
            error: err.to_string(),
            kind: "INTERNAL".to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub db_ok: bool,
}
