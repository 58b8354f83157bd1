use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("reader change locked for {days_remaining} more day(s), next change allowed at {can_change_at}")]
    CooldownActive {
        days_remaining: i64,
        can_change_at: DateTime<Utc>,
    },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("subscription for user {user_id} changed concurrently")]
    Conflict { user_id: i32 },
}

impl BrokerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BrokerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = match self {
            BrokerError::NotFound { .. } => StatusCode::NOT_FOUND,
            BrokerError::InvalidState(_) | BrokerError::Conflict { .. } => StatusCode::CONFLICT,
            BrokerError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
            BrokerError::Forbidden(_) => StatusCode::FORBIDDEN,
            BrokerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            BrokerError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
