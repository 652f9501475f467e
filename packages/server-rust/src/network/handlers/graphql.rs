//! `POST /graphql`: decode the body, run it through the request service,
//! answer with the envelope and the correlation header.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use petstore_core::{Envelope, ErrorCode, InboundOperation};

use super::AppState;
use crate::service::dispatch::RequestBody;
use crate::service::middleware::observability::{resolve_correlation, InboundRequest};

/// Handles one operation request.
pub async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let _in_flight = state.shutdown.in_flight_guard();
    let correlation = resolve_correlation(&headers);

    let body = match serde_json::from_slice::<InboundOperation>(&body) {
        Ok(op) => RequestBody::Parsed(op.into_request()),
        Err(err) => RequestBody::Malformed(err.to_string()),
    };

    let response = state
        .app
        .handle(InboundRequest {
            correlation_id: correlation.id,
            body,
        })
        .await;

    let status = status_for(&response.envelope);
    let mut http = (status, Json(response.envelope)).into_response();
    if let Ok(value) = HeaderValue::from_str(&response.correlation_id) {
        http.headers_mut().insert(correlation.header, value);
    }
    http
}

/// 200 when any field resolved, otherwise derived from the first error.
#[must_use]
pub fn status_for(envelope: &Envelope) -> StatusCode {
    if envelope.data.values().any(|v| !v.is_null()) {
        return StatusCode::OK;
    }
    match envelope.errors.first().map(|e| e.code) {
        None => StatusCode::OK,
        Some(ErrorCode::ValidationFailed) => StatusCode::BAD_REQUEST,
        Some(ErrorCode::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorCode::DuplicateId) => StatusCode::CONFLICT,
        Some(ErrorCode::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(ErrorCode::Overloaded) => StatusCode::SERVICE_UNAVAILABLE,
        Some(ErrorCode::SyncFailure | ErrorCode::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
