//! Implementaciones Postgres (Diesel) de los stores del core.
//!
//! - `PgFlowStore`: versiones de Flow; la activación archiva la versión
//!   activa previa en la misma transacción (índice único parcial como red).
//! - `PgBatchStore`: documento del batch en `batches` + log append-only en
//!   `batch_events`. El commit es un `UPDATE ... WHERE version = $expected`
//!   y la inserción de los eventos nuevos, en una sola transacción.
//!
//! Los errores transitorios (pool, serialización) se reintentan con un
//! backoff corto; el conflicto de versión NO se reintenta aquí, lo decide el
//! motor.

mod batch_store;
mod flow_store;
mod rows;

use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use log::warn;

use crate::config::DbConfig;
use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;

pub use batch_store::PgBatchStore;
pub use flow_store::PgFlowStore;

/// Pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones (pool real o sustituto en tests).
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// `ConnectionProvider` respaldado por un `PgPool`. Clonar comparte el pool.
#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::Transient(format!("pool error: {e}")))
    }
}

/// Reintenta errores transitorios hasta 3 veces (15ms, 30ms, 45ms).
/// `StaleVersion` y las violaciones de constraint se devuelven tal cual.
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if e.is_transient() && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("with_retry:retry attempt={} sleep_ms={delay_ms} err={e}", attempts + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Construye un pool y corre las migraciones pendientes.
///
/// Si `min_size > max_size` se usa `min = max`; tamaños 0 se elevan a 1.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let max = max_size.max(1);
    let min = min_size.max(1);
    if min > max {
        warn!("build_pool: min_size > max_size ({min} > {max}), ajustando min=max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(min.min(max)))
                                    .max_size(max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::Transient(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::Transient(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

pub fn build_pool_from_config(cfg: &DbConfig) -> Result<PgPool, PersistenceError> {
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_pool_from_env() -> Result<PgPool, PersistenceError> {
    build_pool_from_config(&DbConfig::from_env()?)
}
