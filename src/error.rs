//! Error types for switchyard
//!
//! Domain errors (`ToggleError`, `RoutingError`, `RuleError`, `StoreError`)
//! convert into `AppError`, which implements `IntoResponse` for Axum handlers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Rejections from `GatewayOrchestrator::request_toggle`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToggleError {
    /// Recoverable: retry once the cooldown has elapsed
    #[error("Routing switch cooldown active, retry in {remaining_seconds} seconds")]
    CooldownActive { remaining_seconds: u64 },

    #[error("Caller '{caller}' lacks the admin capability required to toggle routing")]
    PermissionDenied { caller: String },

    #[error("Toggle delay of {delay_seconds} seconds exceeds the maximum of {max_seconds} seconds")]
    DelayOutOfRange { delay_seconds: u64, max_seconds: u64 },
}

/// Failures that make a routing decision impossible
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No healthy candidate available for request {request_id}")]
    NoHealthyCandidate { request_id: String },
}

/// Routing rule validation and evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Invalid routing rule '{rule}': {reason}")]
    Invalid { rule: String, reason: String },

    #[error("Routing rule {0} not found")]
    NotFound(u64),

    /// Rule skipped at match time; never surfaced to the request path
    #[error("Routing rule {rule_id} could not be evaluated: {error}")]
    Evaluation { rule_id: u64, error: String },
}

/// Durable store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store record could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Toggle(#[from] ToggleError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": self.to_string(),
        });

        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Toggle(ToggleError::CooldownActive { remaining_seconds }) => {
                body["remaining_seconds"] = serde_json::json!(remaining_seconds);
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Toggle(ToggleError::PermissionDenied { .. }) => StatusCode::FORBIDDEN,
            Self::Toggle(ToggleError::DelayOutOfRange { .. }) => StatusCode::BAD_REQUEST,
            Self::Routing(RoutingError::NoHealthyCandidate { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Rule(RuleError::Invalid { .. }) => StatusCode::BAD_REQUEST,
            Self::Rule(RuleError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Rule(RuleError::Evaluation { .. })
            | Self::Store(_)
            | Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::Toggle(ToggleError::CooldownActive { remaining_seconds }) = &self {
            if let Ok(value) = remaining_seconds.to_string().parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_creates() {
        let err = AppError::Config("test error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_cooldown_message_includes_remaining() {
        let err = ToggleError::CooldownActive {
            remaining_seconds: 42,
        };
        assert_eq!(
            err.to_string(),
            "Routing switch cooldown active, retry in 42 seconds"
        );
    }

    #[test]
    fn test_cooldown_response_is_429_with_retry_after() {
        let err: AppError = ToggleError::CooldownActive {
            remaining_seconds: 42,
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(axum::http::header::RETRY_AFTER).unwrap(),
            "42"
        );
    }

    #[test]
    fn test_permission_denied_response_status() {
        let err: AppError = ToggleError::PermissionDenied {
            caller: "intern".to_string(),
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_delay_out_of_range_is_bad_request() {
        let err: AppError = ToggleError::DelayOutOfRange {
            delay_seconds: u64::MAX,
            max_seconds: 604_800,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_no_healthy_candidate_is_service_unavailable() {
        let err: AppError = RoutingError::NoHealthyCandidate {
            request_id: "r1".to_string(),
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rule_error_statuses() {
        let invalid: AppError = RuleError::Invalid {
            rule: "r".to_string(),
            reason: "bad".to_string(),
        }
        .into();
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let missing: AppError = RuleError::NotFound(7).into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_error_is_internal() {
        let err: AppError = StoreError::Unavailable("disk full".to_string()).into();
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
