use thiserror::Error;

/// Errores del dominio (parseo y validación de valores de entrada).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("validation failed: {0}")]
    Validation(String),
}
