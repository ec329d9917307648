//! Núcleo de `BatchEngine`: operaciones sobre batches.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error, warn};
use refine_domain::{Actor, Batch, Flow, FlowKey, FlowStatus, Pipeline};
use uuid::Uuid;

use crate::catalog::TemplateCatalog;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::{flows, EngineBuilder};
use crate::errors::{CoreEngineError, StoreError};
use crate::machine::{self, StepOutcome, StepSubmission};
use crate::replay::{replay, ReplayReport};
use crate::store::{BatchStore, FlowStore, InMemoryBatchStore, InMemoryFlowStore};

/// Motor de ejecución de batches.
///
/// Todas las operaciones toman `&self`: el motor se comparte entre hilos
/// (p. ej. con `std::thread::scope` o detrás de un `Arc`). Cada mutación de
/// un batch lee una instantánea, la modifica en privado y la confirma con
/// `BatchStore::commit`; si otro escritor ganó, se relee y se reintenta.
pub struct BatchEngine<B, F, T>
    where B: BatchStore,
          F: FlowStore,
          T: TemplateCatalog
{
    pub(super) batches: B,
    pub(super) flows: F,
    pub(super) catalog: T,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
    /// Versiones de Flow ya publicadas (inmutables en su grafo).
    pub(super) flow_cache: DashMap<FlowKey, Arc<Flow>>,
    /// Compartido por `create_batch`; exclusivo para desactivar y borrar
    /// versiones, que cuentan batches antes de escribir.
    pub(super) flow_gate: RwLock<()>,
}

impl<T: TemplateCatalog> BatchEngine<InMemoryBatchStore, InMemoryFlowStore, T> {
    /// Builder con stores en memoria.
    pub fn in_memory(catalog: T) -> EngineBuilder<InMemoryBatchStore, InMemoryFlowStore, T> {
        EngineBuilder::new(InMemoryBatchStore::new(), InMemoryFlowStore::new(), catalog)
    }
}

impl<B, F, T> BatchEngine<B, F, T>
    where B: BatchStore,
          F: FlowStore,
          T: TemplateCatalog
{
    #[inline]
    pub fn builder(batches: B, flows: F, catalog: T) -> EngineBuilder<B, F, T> {
        EngineBuilder::new(batches, flows, catalog)
    }

    pub(crate) fn from_parts(batches: B, flows: F, catalog: T, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self { batches,
               flows,
               catalog,
               clock,
               config,
               flow_cache: DashMap::new(),
               flow_gate: RwLock::new(()) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn batch_store(&self) -> &B {
        &self.batches
    }

    pub fn flow_store(&self) -> &F {
        &self.flows
    }

    pub fn catalog(&self) -> &T {
        &self.catalog
    }

    pub(super) fn load_flow(&self, key: FlowKey) -> Result<Flow, CoreEngineError> {
        self.flows.load(key).map_err(|e| match e {
                                StoreError::NotFound => CoreEngineError::FlowNotFound(key),
                                other => other.into(),
                            })
    }

    /// Flow fijado por un batch. Las versiones publicadas se cachean; los
    /// borradores se leen siempre del store.
    pub(super) fn flow_snapshot(&self, key: FlowKey) -> Result<Arc<Flow>, CoreEngineError> {
        if let Some(flow) = self.flow_cache.get(&key) {
            return Ok(Arc::clone(flow.value()));
        }
        let flow = Arc::new(self.load_flow(key)?);
        if flow.status != FlowStatus::Draft {
            self.flow_cache.insert(key, Arc::clone(&flow));
        }
        Ok(flow)
    }

    // el guard no protege datos: un panic previo no invalida nada
    fn shared_flow_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.flow_gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn exclusive_flow_gate(&self) -> RwLockWriteGuard<'_, ()> {
        self.flow_gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn evict_flows(&self, keys: &[FlowKey]) {
        for key in keys {
            self.flow_cache.remove(key);
        }
    }

    fn load_batch(&self, batch_number: &str) -> Result<Batch, CoreEngineError> {
        self.batches.load_by_number(batch_number).map_err(|e| match e {
                                                     StoreError::NotFound => {
                                                         CoreEngineError::BatchNotFound(batch_number.to_string())
                                                     }
                                                     other => other.into(),
                                                 })
    }

    /// Lee-modifica-confirma con reintento ante conflicto de versión. Si `op`
    /// falla no se escribe nada.
    fn mutate<O, M>(&self, batch_number: &str, mut op: M) -> Result<(Batch, O), CoreEngineError>
        where M: FnMut(&mut Batch, DateTime<Utc>) -> Result<O, CoreEngineError>
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut batch = self.load_batch(batch_number)?;
            let expected = batch.version;
            let logged = batch.events.len();
            let out = op(&mut batch, self.clock.now())?;
            let new_events = batch.events[logged..].to_vec();
            match self.batches.commit(&batch, expected, &new_events) {
                Ok(version) => {
                    batch.version = version;
                    return Ok((batch, out));
                }
                Err(StoreError::VersionConflict { found, .. }) => {
                    if attempt > self.config.max_commit_retries {
                        error!("commit:conflict batch={batch_number} attempts={attempt} giving up");
                        return Err(CoreEngineError::ConcurrencyConflict { batch_id: batch.id,
                                                                          attempts: attempt });
                    }
                    warn!("commit:retry batch={batch_number} attempt={attempt} expected={expected} found={found}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Crea un batch sobre la versión activa del pipeline.
    pub fn create_batch(&self, batch_number: &str, pipeline: &Pipeline, actor: &Actor) -> Result<Batch, CoreEngineError> {
        debug!("create_batch:start number={batch_number} pipeline={pipeline}");
        let _gate = self.shared_flow_gate();
        let flow = self.flows
                       .active_for(pipeline)?
                       .ok_or_else(|| CoreEngineError::NoActiveFlow(pipeline.clone()))?;
        let batch = machine::start_batch(batch_number, &flow, actor, self.clock.now())?;
        self.batches.insert(&batch).map_err(|e| match e {
                                       StoreError::Duplicate(_) => CoreEngineError::DuplicateBatch(batch_number.to_string()),
                                       other => flows::flow_rejection(flow.key(), "create batch", other),
                                   })?;
        debug!("create_batch:ok number={batch_number} flow={}", flow.key());
        Ok(batch)
    }

    /// Completa el nodo actual del batch con la observación del operador.
    pub fn complete_step(&self,
                         batch_number: &str,
                         submission: &StepSubmission,
                         actor: &Actor)
                         -> Result<(Batch, StepOutcome), CoreEngineError> {
        self.mutate(batch_number, |batch, now| {
                let flow = self.flow_snapshot(batch.flow_key())?;
                let template = submission.effective_template_id(&flow)
                                         .and_then(|id| self.catalog.get_template(&id));
                if template.is_none() {
                    debug!("complete_step:template_miss batch={batch_number} node={}", submission.node_id);
                }
                machine::complete_step(batch, &flow, template.as_ref(), submission, actor, now, &self.config)
            })
    }

    pub fn place_hold(&self, batch_number: &str, reason: Option<String>, actor: &Actor) -> Result<Batch, CoreEngineError> {
        self.mutate(batch_number, |batch, now| machine::place_hold(batch, reason.clone(), actor, now))
            .map(|(batch, _)| batch)
    }

    pub fn release_hold(&self, batch_number: &str, actor: &Actor) -> Result<Batch, CoreEngineError> {
        self.mutate(batch_number, |batch, now| machine::release_hold(batch, actor, now))
            .map(|(batch, _)| batch)
    }

    pub fn reassign(&self, batch_number: &str, assignee: &str, actor: &Actor) -> Result<Batch, CoreEngineError> {
        self.mutate(batch_number, |batch, now| {
                machine::reassign(batch, assignee, actor, now);
                Ok(())
            })
            .map(|(batch, _)| batch)
    }

    pub fn batch(&self, id: Uuid) -> Result<Batch, CoreEngineError> {
        self.batches.load(id).map_err(|e| match e {
                                  StoreError::NotFound => CoreEngineError::BatchNotFound(id.to_string()),
                                  other => other.into(),
                              })
    }

    pub fn batch_by_number(&self, batch_number: &str) -> Result<Batch, CoreEngineError> {
        self.load_batch(batch_number)
    }

    /// Reconstruye el batch desde su log y lo compara con lo almacenado.
    pub fn audit(&self, batch_number: &str) -> Result<ReplayReport, CoreEngineError> {
        let batch = self.load_batch(batch_number)?;
        let flow = self.flow_snapshot(batch.flow_key())?;
        replay(&batch, &flow, &self.catalog, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryTemplateCatalog;
    use crate::errors::StoreError;
    use refine_domain::{BatchEvent, BatchStatus, NodeKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store que simula `n` escritores concurrentes ganando antes que
    /// nosotros.
    struct ContendedStore {
        inner: InMemoryBatchStore,
        conflicts_left: AtomicU32,
    }

    impl BatchStore for ContendedStore {
        fn insert(&self, batch: &Batch) -> Result<(), StoreError> {
            self.inner.insert(batch)
        }
        fn load(&self, id: Uuid) -> Result<Batch, StoreError> {
            self.inner.load(id)
        }
        fn load_by_number(&self, n: &str) -> Result<Batch, StoreError> {
            self.inner.load_by_number(n)
        }
        fn commit(&self, batch: &Batch, expected: u64, events: &[BatchEvent]) -> Result<u64, StoreError> {
            if self.conflicts_left.load(Ordering::SeqCst) > 0 {
                self.conflicts_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::VersionConflict { expected,
                                                         found: expected + 1 });
            }
            self.inner.commit(batch, expected, events)
        }
        fn count_for_flow(&self, key: FlowKey, statuses: &[BatchStatus]) -> Result<usize, StoreError> {
            self.inner.count_for_flow(key, statuses)
        }
        fn list_events(&self, id: Uuid) -> Result<Vec<BatchEvent>, StoreError> {
            self.inner.list_events(id)
        }
    }

    fn engine(conflicts: u32, retries: u32) -> BatchEngine<ContendedStore, InMemoryFlowStore, InMemoryTemplateCatalog> {
        let store = ContendedStore { inner: InMemoryBatchStore::new(),
                                     conflicts_left: AtomicU32::new(conflicts) };
        let engine = BatchEngine::builder(store, InMemoryFlowStore::new(), InMemoryTemplateCatalog::new())
            .config(EngineConfig::default().with_max_commit_retries(retries))
            .build();
        let admin = Actor::new("admin", "admin");
        let flow = Flow::new_draft("copper", Pipeline::Copper, "admin", Utc::now())
            .with_node("a", NodeKind::Station, "t-a")
            .with_node("b", NodeKind::Station, "t-b")
            .with_edge("a", "b");
        let draft = engine.create_flow_draft(flow, &admin).unwrap();
        engine.activate_flow(draft.key(), &admin).unwrap();
        engine.create_batch("C-1", &Pipeline::Copper, &admin).unwrap();
        engine
    }

    #[test]
    fn conflicts_within_retry_limit_are_retried() {
        let engine = engine(3, 3);
        let (batch, out) = engine.complete_step("C-1", &StepSubmission::new("a", json!({})), &Actor::new("u", "u")).unwrap();
        assert_eq!(out.next_node_id.as_deref(), Some("b"));
        assert_eq!(batch.version, 1);
        assert_eq!(engine.batch_by_number("C-1").unwrap().completed_node_ids, vec!["a".to_string()]);
    }

    #[test]
    fn conflicts_beyond_retry_limit_surface_and_leave_batch_untouched() {
        let engine = engine(10, 2);
        let err = engine.complete_step("C-1", &StepSubmission::new("a", json!({})), &Actor::new("u", "u")).unwrap_err();
        assert!(matches!(err, CoreEngineError::ConcurrencyConflict { attempts: 3, .. }));
        assert!(err.is_retryable());
        let stored = engine.batch_by_number("C-1").unwrap();
        assert_eq!(stored.version, 0);
        assert_eq!(stored.current_node_id.as_deref(), Some("a"));
    }

    #[test]
    fn unknown_batch_is_reported_by_number() {
        let engine = engine(0, 3);
        let err = engine.release_hold("nope", &Actor::new("u", "u")).unwrap_err();
        assert_eq!(err, CoreEngineError::BatchNotFound("nope".into()));
    }
}
