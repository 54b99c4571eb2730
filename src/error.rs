use std::fmt::Display;

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

use crate::transport::TransportError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("permission denied")]
    PermissionDenied,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("mail transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("dispatch queue is closed")]
    QueueClosed,
}

impl Error {
    /// `key` is the id or name the record was looked up by.
    pub fn not_found(entity: &'static str, key: impl Display) -> Self {
        Error::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Whether a background retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database(_))
    }

    /// Maps a unique constraint violation to a validation error carrying
    /// `message`; any other database error passes through.
    pub(crate) fn unique_violation(err: DbErr, message: impl Into<String>) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Error::Validation(message.into()),
            _ => Error::Database(err),
        }
    }
}
