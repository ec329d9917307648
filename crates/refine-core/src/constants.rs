//! Constantes del motor core.
//!
//! Agrupa valores por defecto de negocio y claves de contrato. Los valores
//! de negocio se pueden sobrescribir vía `EngineConfig`; las claves de
//! payload y la versión de hash no.

/// Versión lógica del hash de definición. Se incluye en el input del hash
/// para que un cambio de canonicalización invalide los snapshots anteriores
/// de forma determinista. Mantener estable mientras no haya cambios
/// incompatibles.
pub const DEFINITION_HASH_VERSION: &str = "R1.0";

/// Ratio de recuperación asumido cuando nunca se capturó un output esperado
/// (99.5%).
pub const DEFAULT_EXPECTED_RECOVERY_RATIO: f64 = 0.995;

/// Pérdida (en % del output esperado) a partir de la cual se marca
/// `LossBeyondTolerance`.
pub const DEFAULT_LOSS_TOLERANCE_PERCENT: f64 = 1.0;

/// Reintentos internos ante conflicto de versión en el commit de un batch.
pub const DEFAULT_MAX_COMMIT_RETRIES: u32 = 3;

pub const DEFAULT_TEMPLATE_CACHE_TTL_SECS: u64 = 300;

/// Clave del payload con la que el operador elige rama en nodos con varias
/// salidas.
pub const BRANCH_SELECTION_KEY: &str = "next_node_id";
