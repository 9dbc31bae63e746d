use rusqlite::ErrorCode;
use rusqlite::ffi;
use thiserror::Error;

use crate::types::TaskStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("unique constraint violation: {0}")]
    UniqueConstraintViolation(String),

    #[error("referential violation: {0}")]
    ReferentialViolation(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("field is immutable: {0}")]
    ImmutableFieldViolation(&'static str),

    #[error("forbidden: missing {resource}:{action}")]
    Forbidden { resource: String, action: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn forbidden(resource: &str, action: &str) -> Self {
        Self::Forbidden {
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }

    /// Infrastructure failures the caller may retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => {
                let detail = msg.clone().unwrap_or_else(|| e.to_string());
                match e.code {
                    ErrorCode::ConstraintViolation => match e.extended_code {
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                            Self::UniqueConstraintViolation(detail)
                        }
                        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Self::ReferentialViolation(detail),
                        ffi::SQLITE_CONSTRAINT_TRIGGER => from_trigger_abort(detail),
                        _ => Self::Internal(detail),
                    },
                    ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::OperationInterrupted
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::DiskFull
                    | ErrorCode::OutOfMemory => Self::StoreUnavailable(detail),
                    _ => Self::Internal(detail),
                }
            }
            _ => Self::Internal(err.to_string()),
        }
    }
}

/// Classifies constraint failures raised from triggers, including foreign key
/// actions SQLite implements as triggers.
fn from_trigger_abort(detail: String) -> Error {
    const IMMUTABLE: [(&str, &str); 3] = [
        ("tasks.created_by_id", "created_by_id"),
        ("task_comments.task_id", "task_id"),
        ("task_comments.user_id", "user_id"),
    ];

    if detail.contains("FOREIGN KEY") {
        return Error::ReferentialViolation(detail);
    }
    if detail.ends_with("is immutable") {
        if let Some((_, field)) = IMMUTABLE.iter().find(|(column, _)| detail.starts_with(column)) {
            return Error::ImmutableFieldViolation(*field);
        }
    }
    Error::Internal(detail)
}
