use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// HTTP-facing error. One variant per status code family the API surface promises callers;
/// mapping from `AppError` lives in `From` below and should stay in lockstep with it.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    #[error("Tenant required")]
    TenantRequired,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            AppError::InvalidTenant(msg) => Self::InvalidTenant(msg),
            AppError::TenantRequired => Self::TenantRequired,
            AppError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            AppError::SessionBusy(msg) => Self::SessionBusy(msg),
            AppError::Conflict(msg) => Self::Conflict(msg),
            AppError::ResourceExhausted(msg) => Self::ResourceExhausted(msg),
            AppError::BackendUnavailable(backend, msg) => {
                Self::BackendUnavailable(format!("{backend}: {msg}"))
            }
            AppError::EmbeddingError(msg) => Self::BackendUnavailable(format!("embedding: {msg}")),
            AppError::LLMError(msg) => Self::BackendUnavailable(format!("llm: {msg}")),
            other => {
                tracing::error!(error = %other, "internal error");
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status, error_type, message) = match &self {
            Self::InternalError(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message.clone())
            }
            Self::ValidationError(message) => {
                (StatusCode::BAD_REQUEST, "validation_error", message.clone())
            }
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message.clone()),
            Self::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", message.clone())
            }
            Self::PayloadTooLarge(message) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                message.clone(),
            ),
            Self::InvalidTenant(message) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_tenant", message.clone())
            }
            Self::TenantRequired => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "tenant_required",
                self.to_string(),
            ),
            Self::InvalidArgument(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_argument",
                message.clone(),
            ),
            Self::SessionBusy(message) => (StatusCode::CONFLICT, "session_busy", message.clone()),
            Self::Conflict(message) => (StatusCode::CONFLICT, "conflict", message.clone()),
            Self::ResourceExhausted(message) => (
                StatusCode::TOO_MANY_REQUESTS,
                "resource_exhausted",
                message.clone(),
            ),
            Self::BackendUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "backend_unavailable",
                message.clone(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                error_type: error_type.to_string(),
                request_id,
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    error_type: String,
    request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::{Backend, AppError};

    fn assert_status(error: ApiError, expected: StatusCode) {
        assert_eq!(error.into_response().status(), expected);
    }

    #[test]
    fn app_error_conversions_map_to_expected_variants() {
        assert!(matches!(
            ApiError::from(AppError::NotFound("x".into())),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(AppError::InvalidTenant("bad".into())),
            ApiError::InvalidTenant(_)
        ));
        assert!(matches!(
            ApiError::from(AppError::TenantRequired),
            ApiError::TenantRequired
        ));
        assert!(matches!(
            ApiError::from(AppError::SessionBusy("s1".into())),
            ApiError::SessionBusy(_)
        ));
        assert!(matches!(
            ApiError::from(AppError::BackendUnavailable(Backend::Cache, "down".into())),
            ApiError::BackendUnavailable(_)
        ));
        assert!(matches!(
            ApiError::from(AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x"))),
            ApiError::InternalError(_)
        ));
    }

    #[test]
    fn status_codes_match_propagation_policy() {
        assert_status(ApiError::InternalError("e".into()), StatusCode::INTERNAL_SERVER_ERROR);
        assert_status(ApiError::ValidationError("e".into()), StatusCode::BAD_REQUEST);
        assert_status(ApiError::NotFound("e".into()), StatusCode::NOT_FOUND);
        assert_status(ApiError::Unauthorized("e".into()), StatusCode::UNAUTHORIZED);
        assert_status(ApiError::PayloadTooLarge("e".into()), StatusCode::PAYLOAD_TOO_LARGE);
        assert_status(ApiError::InvalidTenant("e".into()), StatusCode::UNPROCESSABLE_ENTITY);
        assert_status(ApiError::TenantRequired, StatusCode::UNPROCESSABLE_ENTITY);
        assert_status(ApiError::InvalidArgument("e".into()), StatusCode::UNPROCESSABLE_ENTITY);
        assert_status(ApiError::SessionBusy("e".into()), StatusCode::CONFLICT);
        assert_status(ApiError::Conflict("e".into()), StatusCode::CONFLICT);
        assert_status(ApiError::ResourceExhausted("e".into()), StatusCode::TOO_MANY_REQUESTS);
        assert_status(ApiError::BackendUnavailable("e".into()), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn error_body_carries_type_and_request_id() {
        let response = ApiError::NotFound("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_do_not_leak_raw_messages_through_conversion() {
        let api_error = ApiError::from(AppError::InternalError("secret-connection-string".into()));
        assert!(matches!(api_error, ApiError::InternalError(message) if message == "Internal server error"));
    }
}
