//! The single error type every handler and middleware stage returns.
//!
//! Rendered as `{"requestId": ..., "message": ...}` with the correlation ID
//! of the request currently being served.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use roster_common::protocol::ErrorEnvelope;

use crate::middleware;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    /// Missing, malformed or rejected credentials. The message never says
    /// which check failed.
    pub fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "unauthorized".into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "not found".into(),
        }
    }

    pub fn method_not_allowed() -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "method not allowed".into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    /// An unexpected failure. `detail` is logged, never sent to the client.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        tracing::error!(error = %detail, "internal error");
        Self::internal_fault()
    }

    /// The generic 500 used by the recovery stage.
    pub(crate) fn internal_fault() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Render with an explicit correlation ID, for callers running outside
    /// the request scope.
    pub fn into_response_with_id(self, request_id: impl Into<String>) -> Response {
        let body = ErrorEnvelope::new(request_id, self.message);
        (self.status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = middleware::current_request_id().unwrap_or_default();
        self.into_response_with_id(request_id)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn envelope(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn renders_envelope_with_explicit_id() {
        let resp = ApiError::conflict("account already exists").into_response_with_id("req_42");
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(
            envelope(resp).await,
            serde_json::json!({ "requestId": "req_42", "message": "account already exists" })
        );
    }

    #[tokio::test]
    async fn internal_never_leaks_detail() {
        let err = ApiError::internal("connection refused (os error 111)");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "internal server error");
    }

    #[tokio::test]
    async fn outside_request_scope_uses_empty_id() {
        let resp = ApiError::not_found().into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(envelope(resp).await["requestId"], "");
    }
}
