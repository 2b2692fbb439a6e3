use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

/// Required configuration that is absent or unparseable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

/// Failures talking to OpenWeatherMap.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("OpenWeatherMap request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("OpenWeatherMap returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("OpenWeatherMap response structure error: {0}")]
    Parse(String),

    #[error("OpenWeatherMap reported code {code}: {message}")]
    Api { code: String, message: String },
}

/// Failure of a single delivery strategy. Never aborts the fallback chain.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("WebDriver error: {0}")]
    WebDriver(String),

    #[error("Message box not found: {0}")]
    ElementNotFound(String),

    #[error("Chrome profile {user_data_dir} is locked: {message}")]
    ProfileLocked {
        user_data_dir: String,
        message: String,
    },

    #[error("Helper failed: {0}")]
    Helper(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),
}

/// Failures reading or writing the delivery log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Log file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Delivery log error: {0}")]
    Log(#[from] LogError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Log(err) => {
                tracing::error!("Delivery log error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal log storage error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_lists_names() {
        let err = ConfigError::Missing(vec!["OWM_API_KEY", "LATITUDE"]);
        assert_eq!(err.to_string(), "Missing configuration: OWM_API_KEY, LATITUDE");
    }

    #[test]
    fn test_log_error_maps_to_500() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let response = AppError::from(LogError::from(io)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_bad_request_maps_to_400() {
        let response = AppError::BadRequest("limit must be positive".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
