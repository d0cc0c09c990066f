use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// An externally visible gateway failure: a fixed status code and an opaque
/// JSON body (§7). Internal detail never leaks past this type.
#[derive(Debug)]
pub struct GatewayError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl GatewayError {
    pub fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    pub fn missing_token() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "missing gateway token")
    }

    pub fn unknown_token() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unknown gateway token")
    }

    pub fn provider_config_missing() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "provider configuration unavailable")
    }

    pub fn model_undetermined() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "cannot determine requested model")
    }

    pub fn model_not_permitted() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "model not permitted for this instance")
    }

    pub fn pool_exhausted() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "no healthy credential available")
    }

    pub fn upstream_unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "upstream request failed")
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message }).to_string();
        Response::builder()
            .status(self.status)
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}
