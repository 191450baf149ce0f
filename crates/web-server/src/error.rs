use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use executor::ExecutorError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] database::DbError),
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
    #[error("Valuation error: {0}")]
    Valuation(#[from] valuation::ValuationError),
    #[error("Vault error: {0}")]
    Vault(#[from] vault::VaultError),
    #[error("Exchange error: {0}")]
    Exchange(#[from] exchange::ExchangeError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Converts `AppError` into a JSON HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(database::DbError::NotFound) => {
                (StatusCode::NOT_FOUND, "not found".to_string())
            }
            AppError::Database(e) => {
                tracing::error!(error = ?e, "Database error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal database error occurred".to_string(),
                )
            }
            AppError::Scheduler(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Executor(ExecutorError::PlanNotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("plan {id} not found"))
            }
            AppError::Executor(e) => {
                tracing::error!(error = ?e, "Executor error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Trade execution failed".to_string(),
                )
            }
            AppError::Valuation(e) => {
                tracing::error!(error = ?e, "Valuation error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Portfolio valuation failed".to_string(),
                )
            }
            AppError::Vault(e) => {
                tracing::error!(error = ?e, "Vault error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Credential processing failed".to_string(),
                )
            }
            AppError::Exchange(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
