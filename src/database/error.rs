//! Database error types and sqlx error mapping

use std::fmt;

#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    /// Row or entity not found
    NotFound { entity: String, id: String },
    /// Unique constraint violation (e.g. nonce ledger conflict)
    UniqueViolation { constraint: String },
    /// Connection acquisition or pool failure
    Connection { message: String },
    /// Query execution failure
    Query { message: String },
    /// Anything that does not fit the above
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

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    /// Map a sqlx error into the service taxonomy
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Query {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                if id.is_empty() {
                    write!(f, "{} not found", entity)
                } else {
                    write!(f, "{} '{}' not found", entity, id)
                }
            }
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::Connection { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::Query { message } => write!(f, "query error: {}", message),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind};

        AppError::new(AppErrorKind::Persistence {
            is_retryable: err.is_retryable(),
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_detected() {
        let err = DatabaseError::new(DatabaseErrorKind::UniqueViolation {
            constraint: "callback_nonces_nonce_key".to_string(),
        });
        assert!(err.is_unique_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::Connection {
            message: "pool timed out".to_string(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn not_found_display_omits_empty_id() {
        let err = DatabaseError::not_found("PendingPayment", "");
        assert_eq!(err.to_string(), "PendingPayment not found");
    }
}
