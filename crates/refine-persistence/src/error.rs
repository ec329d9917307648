//! Errores de la capa Postgres y su traducción al `StoreError` del core.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use refine_core::StoreError;
use refine_domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Número de batch o (flow_id, version) repetido.
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("not found")]
    NotFound,
    /// El `UPDATE ... WHERE version = expected` no tocó ninguna fila.
    #[error("stale batch version (expected {expected}, found {found})")]
    StaleVersion { expected: u64, found: u64 },
    /// Pool agotado, conexión caída, deadlock o conflicto de serialización.
    #[error("transient database error: {0}")]
    Transient(String),
    #[error("stored document is invalid: {0}")]
    Serialization(String),
    #[error("configuration: {0}")]
    Config(String),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("database error: {0}")]
    Database(String),
    /// Precondición del store no cumplida; pasa tal cual al core.
    #[error("{0}")]
    Rejected(StoreError),
}

impl PersistenceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

fn looks_transient(message: &str) -> bool {
    let m = message.to_lowercase();
    ["deadlock detected", "connection closed", "timeout"].iter().any(|s| m.contains(s))
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(message),
                    DatabaseErrorKind::CheckViolation
                    | DatabaseErrorKind::ForeignKeyViolation
                    | DatabaseErrorKind::NotNullViolation => Self::Constraint(message),
                    DatabaseErrorKind::SerializationFailure | DatabaseErrorKind::ClosedConnection => {
                        Self::Transient(message)
                    }
                    _ if looks_transient(&message) => Self::Transient(message),
                    other => Self::Database(format!("{other:?}: {message}")),
                }
            }
            DieselError::DeserializationError(e) => Self::Serialization(e.to_string()),
            DieselError::SerializationError(e) => Self::Serialization(e.to_string()),
            DieselError::BrokenTransactionManager => Self::Transient("broken transaction manager".into()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<DomainError> for PersistenceError {
    fn from(err: DomainError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<PersistenceError> for StoreError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound => StoreError::NotFound,
            PersistenceError::UniqueViolation(msg) => StoreError::Duplicate(msg),
            PersistenceError::StaleVersion { expected, found } => StoreError::VersionConflict { expected, found },
            PersistenceError::Rejected(err) => err,
            other => StoreError::Backend(other.to_string()),
        }
    }
}
