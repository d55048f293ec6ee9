use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not signed in")]
    AuthFailure,
    #[error("{0} not found")]
    NotFound(String),
    #[error("you cannot connect with yourself")]
    SelfReference,
    #[error("already in a pending or accepted connection")]
    AlreadyConnected,
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("validation failed: {0}")]
    ValidationFailure(String),
    #[error("subscriber fell behind by {0} events")]
    Lagged(u64),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Session(#[from] tower_sessions::session::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            AuthFailure => StatusCode::UNAUTHORIZED,
            NotFound(_) => StatusCode::NOT_FOUND,
            SelfReference | AlreadyConnected | InvalidTransition(_) => StatusCode::CONFLICT,
            ValidationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Lagged(_) | Db(_) | Session(_) | Json(_) | Io(_) | Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self::Other(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self::Other(anyhow::Error::msg(err.to_owned()))
    }
}
