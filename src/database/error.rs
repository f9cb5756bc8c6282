use std::fmt;

use crate::error::{AppError, AppErrorKind, InfrastructureError};

/// Postgres SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    /// A unique constraint rejected the write. `constraint` is the constraint
    /// name when the driver reports one.
    UniqueViolation { constraint: Option<String> },
    ConnectionError { message: String },
    PoolTimeout,
    Serialization { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn unique_violation(constraint: &str) -> Self {
        Self::new(DatabaseErrorKind::UniqueViolation {
            constraint: Some(constraint.to_string()),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().map(str::to_string),
                }
            }
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolTimeout,
            sqlx::Error::Io(e) => DatabaseErrorKind::ConnectionError {
                message: e.to_string(),
            },
            sqlx::Error::Tls(e) => DatabaseErrorKind::ConnectionError {
                message: e.to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseErrorKind::Serialization {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    /// True when a unique constraint fired, optionally matching its name.
    pub fn is_unique_violation_of(&self, constraint: &str) -> bool {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation { constraint: Some(name) } => name == constraint,
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. } | DatabaseErrorKind::PoolTimeout
        )
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                write!(f, "{} not found: {}", entity, id)
            }
            DatabaseErrorKind::UniqueViolation { constraint } => write!(
                f,
                "unique constraint violated: {}",
                constraint.as_deref().unwrap_or("unknown")
            ),
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::PoolTimeout => write!(f, "timed out acquiring a database connection"),
            DatabaseErrorKind::Serialization { message } => {
                write!(f, "row decode error: {}", message)
            }
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let is_retryable = err.is_retryable();
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable,
        }))
    }
}
