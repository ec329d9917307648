//! Error unificado para clientes de la fachada.
use refine_core::CoreEngineError;
use refine_domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Engine(#[from] CoreEngineError),
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Persistence(#[from] refine_persistence::PersistenceError),
}

impl RefineError {
    /// Sólo los conflictos de concurrencia admiten reintento directo.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RefineError::Engine(e) if e.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, RefineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn engine_errors_keep_their_message() {
        let err: RefineError = CoreEngineError::BatchNotFound("B-7".into()).into();
        assert_eq!(err.to_string(), "batch B-7 not found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn concurrency_conflict_is_retryable() {
        let err: RefineError = CoreEngineError::ConcurrencyConflict { batch_id: Uuid::nil(),
                                                                      attempts: 4 }.into();
        assert!(err.is_retryable());
    }
}
