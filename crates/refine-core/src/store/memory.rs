use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use refine_domain::{Batch, BatchEvent, BatchStatus, Flow, FlowKey, FlowStatus, Pipeline};
use uuid::Uuid;

use super::{BatchStore, FlowStore};
use crate::errors::StoreError;
use crate::graph;

/// Batches en memoria. Cada entrada del `DashMap` se bloquea por separado,
/// así que commits sobre batches distintos no compiten.
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    batches: DashMap<Uuid, Batch>,
    numbers: DashMap<String, Uuid>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl BatchStore for InMemoryBatchStore {
    fn insert(&self, batch: &Batch) -> Result<(), StoreError> {
        match self.numbers.entry(batch.batch_number.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(batch.batch_number.clone())),
            Entry::Vacant(slot) => {
                self.batches.insert(batch.id, batch.clone());
                slot.insert(batch.id);
                Ok(())
            }
        }
    }

    fn load(&self, id: Uuid) -> Result<Batch, StoreError> {
        self.batches.get(&id).map(|b| b.clone()).ok_or(StoreError::NotFound)
    }

    fn load_by_number(&self, batch_number: &str) -> Result<Batch, StoreError> {
        let id = self.numbers.get(batch_number).map(|id| *id).ok_or(StoreError::NotFound)?;
        self.load(id)
    }

    fn commit(&self, batch: &Batch, expected_version: u64, new_events: &[BatchEvent]) -> Result<u64, StoreError> {
        let mut stored = self.batches.get_mut(&batch.id).ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict { expected: expected_version,
                                                     found: stored.version });
        }
        // el log sólo crece: lo almacenado + lo nuevo debe ser el log enviado
        if stored.events.len() + new_events.len() != batch.events.len() || !batch.events.ends_with(new_events) {
            return Err(StoreError::Backend(format!("event log of batch {} diverged", batch.batch_number)));
        }
        let mut next = batch.clone();
        next.version = expected_version + 1;
        *stored = next;
        debug!("memory commit batch={} version={}", batch.batch_number, expected_version + 1);
        Ok(expected_version + 1)
    }

    fn count_for_flow(&self, key: FlowKey, statuses: &[BatchStatus]) -> Result<usize, StoreError> {
        Ok(self.batches
               .iter()
               .filter(|b| b.flow_key() == key && statuses.contains(&b.status))
               .count())
    }

    fn list_events(&self, id: Uuid) -> Result<Vec<BatchEvent>, StoreError> {
        self.batches.get(&id).map(|b| b.events.clone()).ok_or(StoreError::NotFound)
    }
}

/// Flows en memoria. La activación necesita ver todas las versiones del
/// pipeline a la vez, por eso un único `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: RwLock<HashMap<FlowKey, Flow>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<FlowKey, Flow>>, StoreError> {
        self.flows.read().map_err(|_| StoreError::Backend("flow store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<FlowKey, Flow>>, StoreError> {
        self.flows.write().map_err(|_| StoreError::Backend("flow store lock poisoned".into()))
    }
}

impl FlowStore for InMemoryFlowStore {
    fn insert(&self, flow: &Flow) -> Result<(), StoreError> {
        let mut flows = self.write()?;
        if flows.contains_key(&flow.key()) {
            return Err(StoreError::Duplicate(flow.key().to_string()));
        }
        flows.insert(flow.key(), flow.clone());
        Ok(())
    }

    fn load(&self, key: FlowKey) -> Result<Flow, StoreError> {
        self.read()?.get(&key).cloned().ok_or(StoreError::NotFound)
    }

    fn versions(&self, flow_id: Uuid) -> Result<Vec<Flow>, StoreError> {
        let mut out: Vec<Flow> = self.read()?.values().filter(|f| f.flow_id == flow_id).cloned().collect();
        out.sort_by_key(|f| f.version);
        Ok(out)
    }

    fn latest_version(&self, flow_id: Uuid) -> Result<Option<u32>, StoreError> {
        Ok(self.read()?.keys().filter(|k| k.flow_id == flow_id).map(|k| k.version).max())
    }

    fn update_draft(&self, flow: &Flow) -> Result<(), StoreError> {
        let mut flows = self.write()?;
        let stored = flows.get_mut(&flow.key()).ok_or(StoreError::NotFound)?;
        if stored.status != FlowStatus::Draft {
            return Err(StoreError::StatusChanged(stored.status));
        }
        *stored = Flow { status: FlowStatus::Draft,
                         definition_hash: None,
                         ..flow.clone() };
        Ok(())
    }

    fn active_for(&self, pipeline: &Pipeline) -> Result<Option<Flow>, StoreError> {
        Ok(self.read()?
               .values()
               .find(|f| f.status == FlowStatus::Active && &f.pipeline == pipeline)
               .cloned())
    }

    fn activate(&self, key: FlowKey, definition_hash: &str, effective_date: DateTime<Utc>)
                -> Result<Vec<FlowKey>, StoreError> {
        let mut flows = self.write()?;
        let target = flows.get(&key).ok_or(StoreError::NotFound)?;
        if target.status == FlowStatus::Active {
            return Err(StoreError::StatusChanged(FlowStatus::Active));
        }
        if graph::definition_hash(target) != definition_hash {
            debug!("memory activate:definition_changed key={key}");
            return Err(StoreError::DefinitionChanged);
        }
        let pipeline = target.pipeline.clone();
        let mut archived = Vec::new();
        for flow in flows.values_mut() {
            if flow.status == FlowStatus::Active && flow.pipeline == pipeline {
                flow.status = FlowStatus::Archived;
                archived.push(flow.key());
            }
        }
        if let Some(target) = flows.get_mut(&key) {
            target.status = FlowStatus::Active;
            target.definition_hash = Some(definition_hash.to_string());
            target.effective_date = Some(effective_date);
        }
        Ok(archived)
    }

    fn deactivate(&self, key: FlowKey) -> Result<(), StoreError> {
        let mut flows = self.write()?;
        let flow = flows.get_mut(&key).ok_or(StoreError::NotFound)?;
        if flow.status != FlowStatus::Active {
            return Err(StoreError::StatusChanged(flow.status));
        }
        flow.status = FlowStatus::Archived;
        Ok(())
    }

    fn delete(&self, key: FlowKey) -> Result<(), StoreError> {
        let mut flows = self.write()?;
        match flows.get(&key).map(|f| f.status) {
            None => Err(StoreError::NotFound),
            Some(FlowStatus::Active) => Err(StoreError::StatusChanged(FlowStatus::Active)),
            Some(_) => {
                flows.remove(&key);
                Ok(())
            }
        }
    }
}
