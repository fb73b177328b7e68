use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("unknown plan or price: {0}")]
    InvalidPlan(String),
    #[error("no active subscription")]
    NoActiveSubscription,
    #[error("webhook signature verification failed")]
    SignatureError,
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("provider request timed out")]
    ProviderTimeout,
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    /// Transport failures map to the retryable provider variants; the caller
    /// never sees the secret key reqwest may embed in its Display output.
    pub fn from_provider_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::ProviderTimeout
        } else {
            AppError::ProviderError(format!("transport failure: {}", err.without_url()))
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::InvalidPlan(_)
            | AppError::NoActiveSubscription
            | AppError::SignatureError
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ProviderError(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(?self);
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
