//! Errores del core.
//!
//! - `GraphError`: definición de Flow mal formada (sólo aborta la activación).
//! - `StoreError`: contrato de los backends de almacenamiento.
//! - `CoreEngineError`: todo lo que el motor devuelve al llamador.

use refine_domain::{BatchStatus, FlowKey, FlowStatus, Pipeline};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum GraphError {
    #[error("flow has no nodes")] Empty,
    #[error("duplicate node id: {0}")] DuplicateNode(String),
    #[error("duplicate edge {source_node} -> {target_node}")] DuplicateEdge { source_node: String, target_node: String },
    #[error("edge {source_node} -> {target_node} references a missing node")] DanglingEdge { source_node: String, target_node: String },
    #[error("declared entry node {0} does not exist")] UnknownEntry(String),
    #[error("declared entry node {0} has incoming edges")] EntryHasIncoming(String),
    #[error("no entry node (every node has incoming edges)")] NoEntry,
    #[error("ambiguous entry, candidates: {0:?}")] AmbiguousEntry(Vec<String>),
    #[error("cycle detected among nodes: {0:?}")] Cycle(Vec<String>),
    #[error("nodes unreachable from entry: {0:?}")] Unreachable(Vec<String>),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum StoreError {
    #[error("not found")] NotFound,
    #[error("duplicate: {0}")] Duplicate(String),
    #[error("version conflict (expected {expected}, found {found})")] VersionConflict { expected: u64, found: u64 },
    /// La fila existe pero su estado no admite la operación.
    #[error("stored flow is {0}")] StatusChanged(FlowStatus),
    /// La definición almacenada ya no es la que se validó.
    #[error("stored flow definition changed")] DefinitionChanged,
    #[error("referenced by {0} live batch(es)")] InUse(usize),
    #[error("backend: {0}")] Backend(String),
}

#[derive(Debug, Error, PartialEq, Clone)]
pub enum CoreEngineError {
    #[error("invalid flow graph: {0}")]
    Graph(#[from] GraphError),
    #[error("batch {batch_number} is {status}: cannot {action}")]
    State { batch_number: String, status: BatchStatus, action: &'static str },
    #[error("step submitted for node {submitted} but batch is at {expected:?}")]
    NodeMismatch { expected: Option<String>, submitted: String },
    #[error("node {node_id} has several successors {candidates:?}; payload must select one via next_node_id")]
    AmbiguousBranch { node_id: String, candidates: Vec<String> },
    #[error("node {node_id} has no successor named {selected}")]
    InvalidBranch { node_id: String, selected: String },
    #[error("concurrent update on batch {batch_id} after {attempts} attempts")]
    ConcurrencyConflict { batch_id: Uuid, attempts: u32 },
    #[error("flow {0} definition does not match the batch snapshot")]
    SnapshotMismatch(FlowKey),
    #[error("no active flow for pipeline {0}")]
    NoActiveFlow(Pipeline),
    #[error("flow {0} not found")]
    FlowNotFound(FlowKey),
    #[error("flow {key} is {status}: cannot {action}")]
    InvalidFlowStatus { key: FlowKey, status: FlowStatus, action: &'static str },
    #[error("flow {0} was modified while being activated")]
    FlowModified(FlowKey),
    #[error("flow {key} is referenced by {batches} batch(es): cannot {action}")]
    FlowInUse { key: FlowKey, batches: usize, action: &'static str },
    #[error("batch {0} not found")]
    BatchNotFound(String),
    #[error("batch number {0} already exists")]
    DuplicateBatch(String),
    #[error("event log of batch {batch_number} cannot be replayed: {reason}")]
    CorruptLog { batch_number: String, reason: String },
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl CoreEngineError {
    /// Errores que el llamador puede reintentar desde una lectura fresca.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreEngineError::ConcurrencyConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_names_status_and_action() {
        let err = CoreEngineError::State { batch_number: "B-9".into(),
                                           status: BatchStatus::Completed,
                                           action: "complete step" };
        assert_eq!(err.to_string(), "batch B-9 is completed: cannot complete step");
        assert!(!err.is_retryable());
    }

    #[test]
    fn graph_error_converts_into_engine_error() {
        let err: CoreEngineError = GraphError::Cycle(vec!["a".into(), "b".into()]).into();
        assert!(matches!(err, CoreEngineError::Graph(GraphError::Cycle(_))));
    }
}
