use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// The single source of truth is unreachable. Entitlement checks built on
    /// top of this error fail closed: the caller sees a denial, never an allow.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sea_orm::DbErr),

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("Invalid transition: {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Gateway timeout")]
    GatewayTimeout,

    #[error("Gateway rejected charge: {0}")]
    GatewayRejected(String),

    #[error("Concurrent modification")]
    ConcurrentModification,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status_code, error_code, message) = match self {
            AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                (
                    actix_web::http::StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    msg.clone(),
                )
            }
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
            ),
            AppError::UnknownPlan(plan_id) => {
                log::warn!("Unknown plan requested: {plan_id}");
                (
                    actix_web::http::StatusCode::NOT_FOUND,
                    "UNKNOWN_PLAN",
                    format!("Unknown plan: {plan_id}"),
                )
            }
            AppError::InvalidTransition { from, event } => {
                log::warn!("Invalid subscription transition: {from} on {event}");
                (
                    actix_web::http::StatusCode::CONFLICT,
                    "INVALID_TRANSITION",
                    format!("Invalid transition: {from} on {event}"),
                )
            }
            AppError::ConcurrentModification => {
                log::warn!("Concurrent modification, caller should retry");
                (
                    actix_web::http::StatusCode::CONFLICT,
                    "CONCURRENT_MODIFICATION",
                    "Concurrent modification, retry".to_string(),
                )
            }
            AppError::GatewayTimeout => {
                log::error!("Payment gateway timeout");
                (
                    actix_web::http::StatusCode::BAD_GATEWAY,
                    "GATEWAY_TIMEOUT",
                    "Payment gateway timeout".to_string(),
                )
            }
            AppError::GatewayRejected(msg) => {
                log::warn!("Payment gateway rejected charge: {msg}");
                (
                    actix_web::http::StatusCode::PAYMENT_REQUIRED,
                    "GATEWAY_REJECTED",
                    msg.clone(),
                )
            }
            AppError::ExternalApiError(msg) => {
                log::error!("External API error: {msg}");
                (
                    actix_web::http::StatusCode::BAD_GATEWAY,
                    "EXTERNAL_API_ERROR",
                    msg.clone(),
                )
            }
            AppError::StorageUnavailable(err) => {
                log::error!("Storage unavailable: {err}");
                (
                    actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE_UNAVAILABLE",
                    "Storage unavailable".to_string(),
                )
            }
            _ => {
                log::error!("Internal error: {self}");
                (
                    actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        HttpResponse::build(status_code).json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message
            }
        }))
    }
}
