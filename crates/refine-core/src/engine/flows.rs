//! Ciclo de vida de versiones de Flow: borrador, activación, archivo y
//! borrado.
use log::{debug, info};
use refine_domain::{Actor, Flow, FlowKey, FlowStatus, Pipeline};
use uuid::Uuid;

use super::BatchEngine;
use crate::catalog::TemplateCatalog;
use crate::errors::{CoreEngineError, StoreError};
use crate::graph::{definition_hash, validate};
use crate::store::{BatchStore, FlowStore, ACTIVE_STATUSES, ALL_STATUSES};

fn invalid_status(flow: &Flow, action: &'static str) -> CoreEngineError {
    CoreEngineError::InvalidFlowStatus { key: flow.key(),
                                         status: flow.status,
                                         action }
}

/// Traduce el rechazo de un store sobre `key` al error del motor.
pub(super) fn flow_rejection(key: FlowKey, action: &'static str, err: StoreError) -> CoreEngineError {
    match err {
        StoreError::NotFound => CoreEngineError::FlowNotFound(key),
        StoreError::StatusChanged(status) => CoreEngineError::InvalidFlowStatus { key, status, action },
        StoreError::DefinitionChanged => CoreEngineError::FlowModified(key),
        StoreError::InUse(batches) => CoreEngineError::FlowInUse { key, batches, action },
        other => other.into(),
    }
}

impl<B, F, T> BatchEngine<B, F, T>
    where B: BatchStore,
          F: FlowStore,
          T: TemplateCatalog
{
    /// Registra `flow` como borrador. El grafo no se valida aquí sino al
    /// activar.
    pub fn create_flow_draft(&self, flow: Flow, actor: &Actor) -> Result<Flow, CoreEngineError> {
        let draft = Flow { status: FlowStatus::Draft,
                           definition_hash: None,
                           version: flow.version.max(1),
                           created_by: actor.user_id.clone(),
                           created_at: self.clock.now(),
                           ..flow };
        self.flows.insert(&draft)?;
        debug!("create_flow_draft:ok key={} pipeline={}", draft.key(), draft.pipeline);
        Ok(draft)
    }

    /// Reemplaza nodos/aristas de un borrador existente.
    pub fn update_flow_draft(&self, flow: &Flow) -> Result<(), CoreEngineError> {
        let current = self.load_flow(flow.key())?;
        if !current.is_editable() {
            return Err(invalid_status(&current, "edit"));
        }
        self.flows.update_draft(flow).map_err(|e| flow_rejection(flow.key(), "edit", e))
    }

    /// Copia `source` como borrador de la siguiente versión libre.
    pub fn new_flow_version(&self, source: FlowKey, actor: &Actor) -> Result<Flow, CoreEngineError> {
        let flow = self.load_flow(source)?;
        let latest = self.flows.latest_version(source.flow_id)?.unwrap_or(source.version);
        let draft = flow.to_draft_version(latest + 1, actor.user_id.clone(), self.clock.now());
        self.flows.insert(&draft)?;
        debug!("new_flow_version:ok from={source} key={}", draft.key());
        Ok(draft)
    }

    /// Valida el grafo, fija su hash y lo activa archivando la versión activa
    /// previa del pipeline. Devuelve las versiones archivadas.
    ///
    /// El store sólo activa si la definición almacenada sigue teniendo el
    /// hash validado; si el borrador cambió entre medio devuelve
    /// `FlowModified` y la versión activa previa queda intacta.
    pub fn activate_flow(&self, key: FlowKey, actor: &Actor) -> Result<Vec<FlowKey>, CoreEngineError> {
        let flow = self.load_flow(key)?;
        if flow.status == FlowStatus::Active {
            return Err(invalid_status(&flow, "activate"));
        }
        validate(&flow)?;
        let hash = definition_hash(&flow);
        let archived = self.flows
                           .activate(key, &hash, self.clock.now())
                           .map_err(|e| flow_rejection(key, "activate", e))?;
        self.evict_flows(&archived);
        self.evict_flows(&[key]);
        info!("activate_flow:ok key={key} pipeline={} archived={archived:?} by={}",
              flow.pipeline, actor.username);
        Ok(archived)
    }

    /// Archiva la versión activa. Rechazado mientras haya batches `created` o
    /// `in_progress` sobre ella; el conteo y el cambio de estado ocurren con
    /// la creación de batches excluida.
    pub fn deactivate_flow(&self, key: FlowKey, actor: &Actor) -> Result<(), CoreEngineError> {
        let _gate = self.exclusive_flow_gate();
        let flow = self.load_flow(key)?;
        if flow.status != FlowStatus::Active {
            return Err(invalid_status(&flow, "deactivate"));
        }
        let live = self.batches.count_for_flow(key, ACTIVE_STATUSES)?;
        if live > 0 {
            return Err(CoreEngineError::FlowInUse { key,
                                                    batches: live,
                                                    action: "deactivate" });
        }
        self.flows.deactivate(key).map_err(|e| flow_rejection(key, "deactivate", e))?;
        self.evict_flows(&[key]);
        info!("deactivate_flow:ok key={key} by={}", actor.username);
        Ok(())
    }

    /// Borra una versión no activa a la que no apunta ningún batch.
    pub fn delete_flow(&self, key: FlowKey, actor: &Actor) -> Result<(), CoreEngineError> {
        let _gate = self.exclusive_flow_gate();
        let flow = self.load_flow(key)?;
        if flow.status == FlowStatus::Active {
            return Err(invalid_status(&flow, "delete"));
        }
        let pinned = self.batches.count_for_flow(key, ALL_STATUSES)?;
        if pinned > 0 {
            return Err(CoreEngineError::FlowInUse { key,
                                                    batches: pinned,
                                                    action: "delete" });
        }
        self.flows.delete(key).map_err(|e| flow_rejection(key, "delete", e))?;
        self.evict_flows(&[key]);
        info!("delete_flow:ok key={key} by={}", actor.username);
        Ok(())
    }

    pub fn flow(&self, key: FlowKey) -> Result<Flow, CoreEngineError> {
        self.load_flow(key)
    }

    pub fn flow_versions(&self, flow_id: Uuid) -> Result<Vec<Flow>, CoreEngineError> {
        Ok(self.flows.versions(flow_id)?)
    }

    pub fn active_flow(&self, pipeline: &Pipeline) -> Result<Option<Flow>, CoreEngineError> {
        Ok(self.flows.active_for(pipeline)?)
    }
}
