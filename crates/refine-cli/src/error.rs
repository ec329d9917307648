//! Errores del binario y su código de salida.
use refine_core::CoreEngineError;
use refine_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Engine(#[from] CoreEngineError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// 2 uso, 4 operación rechazada, 5 backend.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) | CliError::Json(_) => 2,
            CliError::Engine(CoreEngineError::Store(_)) | CliError::Engine(CoreEngineError::CorruptLog { .. }) => 5,
            CliError::Engine(_) => 4,
            CliError::Persistence(_) | CliError::Io(_) => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refine_core::StoreError;

    #[test]
    fn rejected_operations_exit_with_4() {
        let err = CliError::from(CoreEngineError::BatchNotFound("B-1".into()));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn backend_failures_exit_with_5() {
        let err = CliError::from(CoreEngineError::Store(StoreError::Backend("down".into())));
        assert_eq!(err.exit_code(), 5);
        assert_eq!(CliError::from(PersistenceError::Config("DATABASE_URL".into())).exit_code(), 5);
    }

    #[test]
    fn bad_input_exits_with_2() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        assert_eq!(CliError::from(json_err).exit_code(), 2);
        assert_eq!(CliError::Usage("x".into()).exit_code(), 2);
    }
}
