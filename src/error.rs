use crate::protocol::error_shapes::openai_error_payload;

/// Canonical error type used across all modules.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Upstream rejected request: status={status}, message={message}")]
    UpstreamRejected { status: u16, message: String },
    #[error("Reasoning session bootstrap failed after {attempts} attempts: {message}")]
    SessionBootstrapFailed { attempts: u32, message: String },
    #[error("Reasoning stage produced no content")]
    EmptyReasoningResult,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code and wire-shape selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    ServerError,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::Auth(_) => ErrorCategory::Authentication,
            GatewayError::Config(_)
            | GatewayError::UpstreamUnavailable(_)
            | GatewayError::UpstreamRejected { .. }
            | GatewayError::SessionBootstrapFailed { .. }
            | GatewayError::EmptyReasoningResult
            | GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// Whether this error class may be retried at the bootstrap step.
    ///
    /// Retries never apply to an already-started stream; the orchestrator
    /// consults this only before the reasoning conversation exists.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::UpstreamUnavailable(_) => true,
            GatewayError::UpstreamRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format an error into its HTTP response parts, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    let body = openai_error_payload(cat, &err.to_string());
    (status, body)
}

/// Convert a `GatewayError` into an axum response.
#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_maps_to_400() {
        let err = GatewayError::InvalidRequest("messages is required".into());
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert!(body["error"]["param"].is_null());
    }

    #[test]
    fn upstream_failures_map_to_500() {
        let err = GatewayError::UpstreamRejected {
            status: 503,
            message: "overloaded".into(),
        };
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["type"], "server_error");
    }

    #[test]
    fn transient_classification() {
        assert!(GatewayError::UpstreamUnavailable("connect timeout".into()).is_transient());
        assert!(GatewayError::UpstreamRejected {
            status: 502,
            message: String::new()
        }
        .is_transient());
        assert!(!GatewayError::UpstreamRejected {
            status: 401,
            message: String::new()
        }
        .is_transient());
        assert!(!GatewayError::EmptyReasoningResult.is_transient());
    }
}
