//! Máquina de estados del batch.
//!
//! Funciones puras sobre un `Batch` en memoria: validan la transición,
//! aplican sus efectos y agregan los eventos correspondientes. No hacen I/O;
//! la atomicidad (commit condicional + reintento) es cosa de
//! `engine::BatchEngine`. Toda validación ocurre antes de la primera
//! mutación, así que un error deja el batch intacto.
use chrono::{DateTime, Utc};
use log::debug;
use refine_domain::{Actor, Batch, BatchEventKind, BatchStatus, Flow, Template};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analytics::{apply_step_analytics, finalize_analytics, AnalyticsReport};
use crate::config::EngineConfig;
use crate::constants::BRANCH_SELECTION_KEY;
use crate::errors::CoreEngineError;
use crate::graph::{definition_hash, FlowGraph};

/// Observación enviada por el operador al terminar un nodo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSubmission {
    pub node_id: String,
    /// Plantilla observada; si falta se usa la del nodo.
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl StepSubmission {
    pub fn new(node_id: impl Into<String>, payload: Value) -> Self {
        Self { node_id: node_id.into(),
               template_id: None,
               payload }
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    /// Plantilla efectiva del step: la enviada o la declarada en el nodo.
    pub fn effective_template_id(&self, flow: &Flow) -> Option<String> {
        self.template_id
            .clone()
            .or_else(|| flow.node(&self.node_id).map(|n| n.template_id.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub completed_node_id: String,
    /// `None` si el nodo era terminal y el batch quedó completado.
    pub next_node_id: Option<String>,
    pub status: BatchStatus,
    pub analytics: AnalyticsReport,
}

/// Hash de definición de un Flow: el fijado al activarlo o, si aún no lo
/// tiene (borrador), el calculado al vuelo.
pub fn flow_hash(flow: &Flow) -> String {
    flow.definition_hash.clone().unwrap_or_else(|| definition_hash(flow))
}

/// Crea un batch posicionado en la entrada del Flow y emite `batch_created`.
pub fn start_batch(batch_number: &str, flow: &Flow, actor: &Actor, now: DateTime<Utc>) -> Result<Batch, CoreEngineError> {
    let entry = FlowGraph::new(flow).entry()?;
    let mut batch = Batch::new(batch_number,
                               flow.pipeline.clone(),
                               flow.key(),
                               flow_hash(flow),
                               entry,
                               actor,
                               now);
    batch.push_event(BatchEventKind::BatchCreated { flow_id: flow.flow_id,
                                                    flow_version: flow.version,
                                                    entry_node_id: entry.to_string() },
                     actor,
                     now,
                     Value::Null);
    Ok(batch)
}

/// Sucesor elegido para `node_id`. Con una sola salida no hace falta elegir;
/// con varias, el payload debe nombrar una en `next_node_id`.
pub fn resolve_next(graph: &FlowGraph<'_>, node_id: &str, payload: &Value) -> Result<Option<String>, CoreEngineError> {
    match graph.next_ids(node_id) {
        [] => Ok(None),
        [only] => Ok(Some(only.to_string())),
        candidates => {
            let Some(selected) = payload.get(BRANCH_SELECTION_KEY).and_then(Value::as_str) else {
                return Err(CoreEngineError::AmbiguousBranch { node_id: node_id.to_string(),
                                                              candidates: candidates.iter().map(|c| c.to_string()).collect() });
            };
            if candidates.contains(&selected) {
                Ok(Some(selected.to_string()))
            } else {
                Err(CoreEngineError::InvalidBranch { node_id: node_id.to_string(),
                                                     selected: selected.to_string() })
            }
        }
    }
}

fn ensure_snapshot(batch: &Batch, flow: &Flow) -> Result<(), CoreEngineError> {
    if batch.flow_key() != flow.key() || batch.definition_hash != flow_hash(flow) {
        return Err(CoreEngineError::SnapshotMismatch(batch.flow_key()));
    }
    Ok(())
}

fn state_error(batch: &Batch, action: &'static str) -> CoreEngineError {
    CoreEngineError::State { batch_number: batch.batch_number.clone(),
                             status: batch.status,
                             action }
}

/// Completa el nodo actual del batch.
///
/// Orden de efectos: analítica, evento `step_completed`, avance del cursor y,
/// si el nodo era terminal, cierre con `finalize_analytics` y
/// `batch_completed`.
pub fn complete_step(batch: &mut Batch,
                     flow: &Flow,
                     template: Option<&Template>,
                     submission: &StepSubmission,
                     actor: &Actor,
                     now: DateTime<Utc>,
                     config: &EngineConfig)
                     -> Result<StepOutcome, CoreEngineError> {
    if matches!(batch.status, BatchStatus::Completed | BatchStatus::OnHold) {
        return Err(state_error(batch, "complete step"));
    }
    if batch.current_node_id.as_deref() != Some(submission.node_id.as_str()) {
        return Err(CoreEngineError::NodeMismatch { expected: batch.current_node_id.clone(),
                                                   submitted: submission.node_id.clone() });
    }
    ensure_snapshot(batch, flow)?;
    let graph = FlowGraph::new(flow);
    if !graph.contains(&submission.node_id) {
        return Err(CoreEngineError::SnapshotMismatch(batch.flow_key()));
    }
    let next = resolve_next(&graph, &submission.node_id, &submission.payload)?;
    let template_id = submission.effective_template_id(flow).unwrap_or_default();

    let analytics = apply_step_analytics(batch, template, &submission.payload, now, config);
    batch.push_event(BatchEventKind::StepCompleted { node_id: submission.node_id.clone(),
                                                     template_id,
                                                     next_node_id: next.clone(),
                                                     rules: analytics.rule_names() },
                     actor,
                     now,
                     submission.payload.clone());
    batch.completed_node_ids.push(submission.node_id.clone());

    match &next {
        Some(next_id) => {
            batch.current_node_id = Some(next_id.clone());
            if batch.status == BatchStatus::Created {
                batch.status = BatchStatus::InProgress;
            }
        }
        None => {
            batch.status = BatchStatus::Completed;
            batch.completed_at = Some(now);
            batch.current_node_id = None;
            finalize_analytics(batch, config);
            batch.push_event(BatchEventKind::BatchCompleted, actor, now, Value::Null);
        }
    }
    debug!("complete_step batch={} node={} next={:?} status={}",
           batch.batch_number, submission.node_id, next, batch.status);

    Ok(StepOutcome { completed_node_id: submission.node_id.clone(),
                     next_node_id: next,
                     status: batch.status,
                     analytics })
}

pub fn place_hold(batch: &mut Batch, reason: Option<String>, actor: &Actor, now: DateTime<Utc>) -> Result<(), CoreEngineError> {
    if batch.status != BatchStatus::InProgress {
        return Err(state_error(batch, "place hold"));
    }
    batch.status = BatchStatus::OnHold;
    batch.push_event(BatchEventKind::HoldPlaced { reason }, actor, now, Value::Null);
    Ok(())
}

pub fn release_hold(batch: &mut Batch, actor: &Actor, now: DateTime<Utc>) -> Result<(), CoreEngineError> {
    if batch.status != BatchStatus::OnHold {
        return Err(state_error(batch, "release hold"));
    }
    batch.status = BatchStatus::InProgress;
    batch.push_event(BatchEventKind::HoldReleased, actor, now, Value::Null);
    Ok(())
}

/// Reasignación administrativa; válida en cualquier estado, incluso
/// completado.
pub fn reassign(batch: &mut Batch, assignee: &str, actor: &Actor, now: DateTime<Utc>) {
    let from = batch.assigned_to.replace(assignee.to_string());
    batch.push_event(BatchEventKind::Reassigned { from,
                                                  to: assignee.to_string() },
                     actor,
                     now,
                     Value::Null);
}
