use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::error;

use crate::types::QuestionType;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Type mismatch: question expects a {expected} answer, got {found}")]
    TypeMismatch {
        expected: QuestionType,
        found: QuestionType,
    },

    #[error("Invalid confidence {0}: must be between 0 and 100")]
    InvalidConfidence(i64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Question {0} is already resolved")]
    AlreadyResolved(i64),

    #[error("Question {0} is past its deadline")]
    DeadlinePassed(i64),

    #[error("Question {0} has not reached its deadline yet")]
    DeadlineNotReached(i64),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resolution of question {question_id} aborted after stamping {stamped}/{total} predictions; nothing was persisted")]
    PartialResolution {
        question_id: i64,
        stamped: usize,
        total: usize,
    },

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TypeMismatch { .. } | AppError::InvalidConfidence(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyResolved(_)
            | AppError::DeadlinePassed(_)
            | AppError::DeadlineNotReached(_) => StatusCode::CONFLICT,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::PartialResolution { .. }
            | AppError::CorruptRow(_)
            | AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Config(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        (status, self.to_string()).into_response()
    }
}
