//! Response envelope and opaque cursor encoding shared by every public
//! handler (§4.M). Handlers never spread internal structs into a
//! response — each constructs a fresh record naming exactly the allowed
//! fields.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Meta {
    pub count: usize,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub meta: Meta,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T, count: usize, next_cursor: Option<String>, has_more: bool) -> Self {
        Self { success: true, data, meta: Meta { count, next_cursor, has_more } }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

/// An API error with the HTTP status and machine-readable code §4.M's
/// envelope requires (`{success:false, error:{code,message}}`).
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "bad_request", message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, code: "not_found", message: message.into() }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, code: "unauthenticated", message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal", message: message.into() }
    }
}

impl From<crate::error::LivermoreError> for ApiError {
    fn from(e: crate::error::LivermoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope { success: false, error: ErrorBody { code: self.code.to_string(), message: self.message } };
        (self.status, axum::Json(body)).into_response()
    }
}

/// Wraps the last primary-key/cursor value as an opaque base64 string so
/// clients never see or depend on the underlying representation.
pub fn encode_cursor(value: impl ToString) -> String {
    URL_SAFE_NO_PAD.encode(value.to_string())
}

pub fn decode_cursor<T: std::str::FromStr>(cursor: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    let s = String::from_utf8(bytes).ok()?;
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let cursor = encode_cursor(1_700_000_000_000i64);
        let decoded: i64 = decode_cursor(&cursor).unwrap();
        assert_eq!(decoded, 1_700_000_000_000i64);
    }

    #[test]
    fn malformed_cursor_decodes_to_none() {
        let decoded: Option<i64> = decode_cursor("not-valid-base64!!");
        assert!(decoded.is_none());
    }
}
