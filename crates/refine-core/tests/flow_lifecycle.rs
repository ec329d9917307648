
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use engine_support::*;
use refine_core::{BatchEngine, CoreEngineError, FixedClock, FlowStore, GraphError, InMemoryBatchStore, InMemoryFlowStore,
                  StepSubmission, StoreError};
use refine_domain::{Flow, FlowEdge, FlowKey, FlowStatus, NodeKind, Pipeline};
use serde_json::json;
use uuid::Uuid;

/// Aplica una edición pendiente sobre el borrador justo antes de activarlo,
/// como un editor concurrente que guarda entre la validación y la escritura.
#[derive(Default)]
struct EditBeforeActivate {
    inner: InMemoryFlowStore,
    pending_edit: Mutex<Option<Flow>>,
}

impl FlowStore for EditBeforeActivate {
    fn insert(&self, flow: &Flow) -> Result<(), StoreError> {
        self.inner.insert(flow)
    }

    fn load(&self, key: FlowKey) -> Result<Flow, StoreError> {
        self.inner.load(key)
    }

    fn versions(&self, flow_id: Uuid) -> Result<Vec<Flow>, StoreError> {
        self.inner.versions(flow_id)
    }

    fn latest_version(&self, flow_id: Uuid) -> Result<Option<u32>, StoreError> {
        self.inner.latest_version(flow_id)
    }

    fn update_draft(&self, flow: &Flow) -> Result<(), StoreError> {
        self.inner.update_draft(flow)
    }

    fn active_for(&self, pipeline: &Pipeline) -> Result<Option<Flow>, StoreError> {
        self.inner.active_for(pipeline)
    }

    fn activate(&self, key: FlowKey, definition_hash: &str, effective_date: DateTime<Utc>)
                -> Result<Vec<FlowKey>, StoreError> {
        if let Some(edit) = self.pending_edit.lock().unwrap().take() {
            self.inner.update_draft(&edit)?;
        }
        self.inner.activate(key, definition_hash, effective_date)
    }

    fn deactivate(&self, key: FlowKey) -> Result<(), StoreError> {
        self.inner.deactivate(key)
    }

    fn delete(&self, key: FlowKey) -> Result<(), StoreError> {
        self.inner.delete(key)
    }
}

#[test]
fn activating_new_gold_flow_archives_previous() {
    let (engine, _clock, v1) = gold_engine();
    let v2 = engine.new_flow_version(v1.key(), &admin()).unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.flow_id, v1.flow_id);
    assert_eq!(v2.status, FlowStatus::Draft);

    let archived = engine.activate_flow(v2.key(), &admin()).unwrap();
    assert_eq!(archived, vec![v1.key()]);
    assert_eq!(engine.flow(v1.key()).unwrap().status, FlowStatus::Archived);
    assert_eq!(engine.active_flow(&Pipeline::Gold).unwrap().map(|f| f.key()), Some(v2.key()));

    let versions: Vec<u32> = engine.flow_versions(v1.flow_id).unwrap().iter().map(|f| f.version).collect();
    assert_eq!(versions, vec![1, 2]);
}

#[test]
fn batches_keep_their_pinned_version_after_activation() {
    let (engine, _clock, v1) = gold_engine();
    let op = operator();
    engine.create_batch("G-OLD", &Pipeline::Gold, &op).unwrap();

    let mut v2 = engine.new_flow_version(v1.key(), &admin()).unwrap();
    v2.nodes.retain(|n| n.id != "sign_off");
    v2.edges.retain(|e| e.target_node_id != "sign_off");
    engine.update_flow_draft(&v2).unwrap();
    engine.activate_flow(v2.key(), &admin()).unwrap();

    let fresh = engine.create_batch("G-NEW", &Pipeline::Gold, &op).unwrap();
    assert_eq!(fresh.flow_version, 2);

    for node in ["receiving", "melting", "casting", "recovery", "sign_off"] {
        engine.complete_step("G-OLD", &StepSubmission::new(node, json!({})), &op).unwrap();
    }
    let old = engine.batch_by_number("G-OLD").unwrap();
    assert_eq!(old.flow_version, 1);
    assert_eq!(old.completed_node_ids.len(), 5);
}

#[test]
fn deactivating_flow_with_in_progress_batch_fails() {
    let (engine, _clock, flow) = gold_engine();
    let op = operator();
    engine.create_batch("G-LIVE", &Pipeline::Gold, &op).unwrap();
    engine.complete_step("G-LIVE", &StepSubmission::new("receiving", json!({})), &op).unwrap();

    let err = engine.deactivate_flow(flow.key(), &admin()).unwrap_err();
    assert_eq!(err,
               CoreEngineError::FlowInUse { key: flow.key(),
                                            batches: 1,
                                            action: "deactivate" });
    assert_eq!(engine.flow(flow.key()).unwrap().status, FlowStatus::Active);
}

#[test]
fn deactivate_allowed_once_batches_are_done_but_delete_is_not() {
    let (engine, _clock, flow) = gold_engine();
    let op = operator();
    engine.create_batch("G-DONE", &Pipeline::Gold, &op).unwrap();
    for node in ["receiving", "melting", "casting", "recovery", "sign_off"] {
        engine.complete_step("G-DONE", &StepSubmission::new(node, json!({})), &op).unwrap();
    }
    engine.deactivate_flow(flow.key(), &admin()).unwrap();
    assert_eq!(engine.flow(flow.key()).unwrap().status, FlowStatus::Archived);
    assert!(engine.active_flow(&Pipeline::Gold).unwrap().is_none());

    let err = engine.delete_flow(flow.key(), &admin()).unwrap_err();
    assert!(matches!(err, CoreEngineError::FlowInUse { action: "delete", .. }));
    // el batch completado sigue auditable
    assert!(engine.audit("G-DONE").unwrap().is_consistent());
}

#[test]
fn unused_draft_can_be_deleted_but_active_cannot() {
    let (engine, _clock, flow) = gold_engine();
    let draft = engine.new_flow_version(flow.key(), &admin()).unwrap();
    engine.delete_flow(draft.key(), &admin()).unwrap();
    assert_eq!(engine.flow(draft.key()).unwrap_err(), CoreEngineError::FlowNotFound(draft.key()));

    let err = engine.delete_flow(flow.key(), &admin()).unwrap_err();
    assert!(matches!(err, CoreEngineError::InvalidFlowStatus { status: FlowStatus::Active, .. }));
}

#[test]
fn activation_rejects_invalid_graph_and_keeps_previous_active() {
    let (engine, _clock, flow) = gold_engine();
    let mut cyclic = engine.new_flow_version(flow.key(), &admin()).unwrap();
    cyclic.edges.push(FlowEdge { source_node_id: "sign_off".into(),
                                 target_node_id: "melting".into() });
    engine.update_flow_draft(&cyclic).unwrap();

    let err = engine.activate_flow(cyclic.key(), &admin()).unwrap_err();
    assert!(matches!(err, CoreEngineError::Graph(GraphError::Cycle(_))));
    assert_eq!(engine.active_flow(&Pipeline::Gold).unwrap().map(|f| f.key()), Some(flow.key()));
}

#[test]
fn only_drafts_are_editable() {
    let (engine, _clock, flow) = gold_engine();
    let edited = flow.clone().with_node("extra", NodeKind::Check, "t-sign");
    let err = engine.update_flow_draft(&edited).unwrap_err();
    assert!(matches!(err, CoreEngineError::InvalidFlowStatus { action: "edit", .. }));
    assert!(matches!(engine.activate_flow(flow.key(), &admin()),
                     Err(CoreEngineError::InvalidFlowStatus { action: "activate", .. })));
}

#[test]
fn archived_version_can_be_reactivated() {
    let (engine, _clock, v1) = gold_engine();
    let v2 = engine.new_flow_version(v1.key(), &admin()).unwrap();
    engine.activate_flow(v2.key(), &admin()).unwrap();
    let archived = engine.activate_flow(v1.key(), &admin()).unwrap();
    assert_eq!(archived, vec![v2.key()]);
    let batch = engine.create_batch("G-RB", &Pipeline::Gold, &operator()).unwrap();
    assert_eq!(batch.flow_version, 1);
}

#[test]
fn draft_edited_during_activation_is_not_promoted() {
    let clock = Arc::new(FixedClock::new(monday_8()));
    let engine = BatchEngine::builder(InMemoryBatchStore::new(), EditBeforeActivate::default(), catalog()).clock(clock)
                                                                                                         .build();
    let v1 = engine.create_flow_draft(gold_flow("gold refining"), &admin()).unwrap();
    engine.activate_flow(v1.key(), &admin()).unwrap();

    let v2 = engine.new_flow_version(v1.key(), &admin()).unwrap();
    let mut cyclic = v2.clone();
    cyclic.edges.push(FlowEdge { source_node_id: "sign_off".into(),
                                 target_node_id: "melting".into() });
    *engine.flow_store().pending_edit.lock().unwrap() = Some(cyclic);

    let err = engine.activate_flow(v2.key(), &admin()).unwrap_err();
    assert_eq!(err, CoreEngineError::FlowModified(v2.key()));
    assert_eq!(engine.flow(v2.key()).unwrap().status, FlowStatus::Draft);
    assert_eq!(engine.active_flow(&Pipeline::Gold).unwrap().map(|f| f.key()), Some(v1.key()));
    let batch = engine.create_batch("G-SAFE", &Pipeline::Gold, &operator()).unwrap();
    assert_eq!(batch.flow_version, 1);

    // reintentar valida la definición nueva
    let err = engine.activate_flow(v2.key(), &admin()).unwrap_err();
    assert!(matches!(err, CoreEngineError::Graph(GraphError::Cycle(_))));
}
