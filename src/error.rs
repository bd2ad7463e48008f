// error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures of the backing vote store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("voting option {0} does not exist")]
    UnknownOption(i64),

    #[error("the poll already has {0} voting options")]
    OptionLimit(usize),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("network error: {0}")]
    Network(#[from] StoreError),

    #[error("{0}")]
    Validation(String),

    #[error("demographic information is required before voting")]
    DemographicsRequired,

    #[error("an admin session is required")]
    AuthRequired,

    #[error("at most {0} voting options are allowed")]
    OptionLimit(usize),

    #[error("this action must be confirmed")]
    ConfirmationRequired,

    #[error("a vote is already being submitted")]
    VoteInProgress,

    #[error("invalid configuration: {0}")]
    Schema(String),

    #[error("local storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// HTTP-facing wrapper around [`PollError`].
#[derive(Error, Debug)]
#[error(transparent)]
pub struct AppError(#[from] pub PollError);

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError(PollError::Network(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PollError::Validation(_)
            | PollError::DemographicsRequired
            | PollError::ConfirmationRequired
            | PollError::OptionLimit(_)
            | PollError::Network(StoreError::OptionLimit(_)) => StatusCode::BAD_REQUEST,
            PollError::AuthRequired => StatusCode::UNAUTHORIZED,
            PollError::VoteInProgress => StatusCode::CONFLICT,
            PollError::Network(StoreError::UnknownOption(_)) => StatusCode::NOT_FOUND,
            PollError::Network(_) | PollError::Schema(_) | PollError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
            "Operation failed. Please try again.".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
