//! Responses generated by the gateway itself.
use axum::{
    body::Body,
    http::{HeaderValue, Response, StatusCode, header},
};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
}

/// `{"success": false, "error": message}` with the given status.
pub fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::to_vec(&ErrorBody {
        success: false,
        error: message,
    })
    .unwrap_or_else(|_| br#"{"success":false,"error":"Internal server error"}"#.to_vec());

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Generic 500 used when a stage faults.
pub fn internal_error() -> Response<Body> {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}
