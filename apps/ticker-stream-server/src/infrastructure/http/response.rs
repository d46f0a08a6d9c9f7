//! API Response Envelope
//!
//! Every API response body has the shape `{status, data, errors}`:
//! `status` is 1 on success and 0 on failure, `errors` lists human-readable
//! messages, and `data` carries the payload (omitted on most failures).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

/// Message for a missing or malformed request parameter.
pub const INVALID_REQUEST: &str = "Invalid request parameters";
/// Message for an unknown trading pair.
pub const COIN_NOT_FOUND: &str = "Coin not found";
/// Message for any server-side failure.
pub const INTERNAL_ERROR: &str = "Internal server error";

/// Response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// 1 on success, 0 on failure.
    pub status: u8,
    /// Payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error messages.
    pub errors: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Successful response carrying `data`.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            status: 1,
            data: Some(data),
            errors: Vec::new(),
        }
    }
}

impl ApiResponse<Value> {
    /// Failed response with one error message and no payload.
    #[must_use]
    pub fn error(message: &str) -> Self {
        Self {
            status: 0,
            data: None,
            errors: vec![message.to_string()],
        }
    }

    /// Failed response with an empty object payload.
    #[must_use]
    pub fn error_with_empty_data(message: &str) -> Self {
        Self {
            data: Some(Value::Object(serde_json::Map::new())),
            ..Self::error(message)
        }
    }
}

/// 200 with records.
pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

/// 400 `Invalid request parameters`.
pub fn invalid_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::error(INVALID_REQUEST)),
    )
        .into_response()
}

/// 404 `Coin not found` with `data: {}`.
pub fn coin_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error_with_empty_data(COIN_NOT_FOUND)),
    )
        .into_response()
}

/// 500 `Internal server error`.
pub fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error(INTERNAL_ERROR)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn success_envelope() {
        let body = serde_json::to_value(ApiResponse::ok(vec![1, 2])).unwrap();
        assert_eq!(body, json!({"status": 1, "data": [1, 2], "errors": []}));
    }

    #[test]
    fn invalid_request_omits_data() {
        let body = serde_json::to_value(ApiResponse::error(INVALID_REQUEST)).unwrap();
        assert_eq!(
            body,
            json!({"status": 0, "errors": ["Invalid request parameters"]})
        );
    }

    #[test]
    fn not_found_carries_empty_object() {
        let body = serde_json::to_value(ApiResponse::error_with_empty_data(COIN_NOT_FOUND)).unwrap();
        assert_eq!(
            body,
            json!({"status": 0, "data": {}, "errors": ["Coin not found"]})
        );
    }
}
