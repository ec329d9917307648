//! Contratos de almacenamiento del motor.
//!
//! Los stores trabajan con `&self` (mutabilidad interior) para que un mismo
//! motor pueda atender operadores concurrentes. El control de concurrencia
//! es optimista y por batch: `commit` sólo escribe si la versión almacenada
//! coincide con `expected_version`.

mod memory;

use chrono::{DateTime, Utc};
use refine_domain::{Batch, BatchEvent, BatchStatus, Flow, FlowKey, Pipeline};
use uuid::Uuid;

use crate::errors::StoreError;

pub use memory::{InMemoryBatchStore, InMemoryFlowStore};

/// Todos los estados; útil para `count_for_flow`.
pub const ALL_STATUSES: &[BatchStatus] =
    &[BatchStatus::Created, BatchStatus::InProgress, BatchStatus::OnHold, BatchStatus::Completed];

/// Estados que impiden desactivar un Flow.
pub const ACTIVE_STATUSES: &[BatchStatus] = &[BatchStatus::Created, BatchStatus::InProgress];

pub trait BatchStore: Send + Sync {
    /// Persiste un batch nuevo (versión 0) con su log inicial.
    /// `Duplicate` si el `batch_number` ya existe. Los backends que guardan
    /// también los flows rechazan con `StatusChanged` si la versión fijada
    /// dejó de estar activa.
    fn insert(&self, batch: &Batch) -> Result<(), StoreError>;

    fn load(&self, id: Uuid) -> Result<Batch, StoreError>;

    fn load_by_number(&self, batch_number: &str) -> Result<Batch, StoreError>;

    /// Escribe el documento y agrega `new_events` al log en una sola unidad,
    /// sólo si la versión almacenada es `expected_version`. Devuelve la
    /// versión nueva (`expected_version + 1`).
    fn commit(&self, batch: &Batch, expected_version: u64, new_events: &[BatchEvent]) -> Result<u64, StoreError>;

    /// Cantidad de batches que fijan `key` y están en alguno de `statuses`.
    fn count_for_flow(&self, key: FlowKey, statuses: &[BatchStatus]) -> Result<usize, StoreError>;

    /// Log del batch ordenado por `seq`.
    fn list_events(&self, id: Uuid) -> Result<Vec<BatchEvent>, StoreError>;
}

pub trait FlowStore: Send + Sync {
    /// `Duplicate` si la pareja (flow_id, version) ya existe.
    fn insert(&self, flow: &Flow) -> Result<(), StoreError>;

    fn load(&self, key: FlowKey) -> Result<Flow, StoreError>;

    /// Todas las versiones de un Flow, ascendentes.
    fn versions(&self, flow_id: Uuid) -> Result<Vec<Flow>, StoreError>;

    fn latest_version(&self, flow_id: Uuid) -> Result<Option<u32>, StoreError>;

    /// Reemplaza la definición de un borrador. `NotFound` si la versión no
    /// existe; `StatusChanged` si ya no es `draft`.
    fn update_draft(&self, flow: &Flow) -> Result<(), StoreError>;

    fn active_for(&self, pipeline: &Pipeline) -> Result<Option<Flow>, StoreError>;

    /// Activa `key` fijando su hash y archiva, en la misma unidad, la versión
    /// activa previa del pipeline. Devuelve las claves archivadas.
    ///
    /// Dentro de esa unidad se recalcula el hash de la definición almacenada:
    /// `DefinitionChanged` si no coincide con `definition_hash` (el borrador
    /// cambió después de validarse), `StatusChanged` si ya está activa. En
    /// ambos casos no se toca nada.
    fn activate(&self, key: FlowKey, definition_hash: &str, effective_date: DateTime<Utc>)
                -> Result<Vec<FlowKey>, StoreError>;

    /// Archiva `key` si sigue activa (`StatusChanged` si no). Los backends
    /// que guardan también los batches rechazan con `InUse` mientras haya
    /// batches `created`/`in_progress` sobre ella, en la misma unidad.
    fn deactivate(&self, key: FlowKey) -> Result<(), StoreError>;

    /// Borra una versión no activa (`StatusChanged` si está activa).
    fn delete(&self, key: FlowKey) -> Result<(), StoreError>;
}
