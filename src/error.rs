//! Error handling and JSON error responses for the gateway

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Response body type shared by all handlers. File bodies are streamed, so
/// the error type is `std::io::Error` rather than `Infallible`.
pub type GatewayBody = BoxBody<Bytes, std::io::Error>;

/// Error codes for gateway errors
///
/// A containment violation has no code of its own: it maps to
/// `AssetNotFound` so callers cannot tell a blocked traversal apart from a
/// plain miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    /// Missing or unparseable Host header
    MalformedRequest,
    /// No binding exists for the requested domain
    UnknownDomain,
    /// The fallback chain found no servable file
    AssetNotFound,
    /// The tenant binding store could not be queried
    StoreUnavailable,
    /// I/O failure on a file that had already passed resolution
    FilesystemFailure,
}

impl GatewayErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::MalformedRequest => StatusCode::BAD_REQUEST,
            GatewayErrorCode::UnknownDomain => StatusCode::NOT_FOUND,
            GatewayErrorCode::AssetNotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayErrorCode::FilesystemFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::MalformedRequest => "MALFORMED_REQUEST",
            GatewayErrorCode::UnknownDomain => "UNKNOWN_DOMAIN",
            GatewayErrorCode::AssetNotFound => "ASSET_NOT_FOUND",
            GatewayErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            GatewayErrorCode::FilesystemFailure => "FILESYSTEM_FAILURE",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: GatewayErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Gateway-Error header
pub fn json_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> Response<GatewayBody> {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Gateway-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(
            GatewayErrorCode::MalformedRequest.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayErrorCode::UnknownDomain.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayErrorCode::AssetNotFound.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayErrorCode::FilesystemFailure.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayErrorCode::StoreUnavailable.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_json() {
        let error = ErrorResponse::new(
            GatewayErrorCode::UnknownDomain,
            "Unknown or unconfigured domain",
        );
        let json = error.to_json();

        assert!(json.contains("\"code\":\"UNKNOWN_DOMAIN\""));
        assert!(json.contains("\"message\":\"Unknown or unconfigured domain\""));
        assert!(json.contains("\"status\":404"));
    }

    #[test]
    fn test_json_error_response() {
        let response =
            json_error_response(GatewayErrorCode::FilesystemFailure, "Failed to read file");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get("X-Gateway-Error").unwrap(),
            "FILESYSTEM_FAILURE"
        );
    }

    #[test]
    fn test_error_code_header_values() {
        assert_eq!(
            GatewayErrorCode::MalformedRequest.as_header_value(),
            "MALFORMED_REQUEST"
        );
        assert_eq!(
            GatewayErrorCode::AssetNotFound.as_header_value(),
            "ASSET_NOT_FOUND"
        );
    }
}
