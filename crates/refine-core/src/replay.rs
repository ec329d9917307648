//! Reconstrucción de un batch a partir de su log.
//!
//! Cada evento se vuelve a aplicar con la misma transición de `machine`,
//! usando el timestamp y el actor del evento como reloj y operador. El
//! resultado permite auditar que los campos derivados almacenados son los
//! que el log implica.
//!
//! Las plantillas se resuelven contra el catálogo actual; si una plantilla
//! cambió de nombre desde la captura, el replay puede diferir legítimamente.
use log::{debug, warn};
use refine_domain::{Batch, BatchEvent, BatchEventKind, Flow};

use crate::catalog::TemplateCatalog;
use crate::config::EngineConfig;
use crate::errors::CoreEngineError;
use crate::machine::{self, StepSubmission};

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub rebuilt: Batch,
    /// Campos derivados que difieren entre lo almacenado y lo reconstruido.
    pub mismatches: Vec<&'static str>,
}

impl ReplayReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

fn corrupt(batch_number: &str, reason: impl Into<String>) -> CoreEngineError {
    CoreEngineError::CorruptLog { batch_number: batch_number.to_string(),
                                  reason: reason.into() }
}

/// Reproduce `events` sobre `flow` y devuelve el batch resultante.
pub fn rebuild<C>(batch_number: &str,
                  events: &[BatchEvent],
                  flow: &Flow,
                  catalog: &C,
                  config: &EngineConfig)
                  -> Result<Batch, CoreEngineError>
    where C: TemplateCatalog + ?Sized
{
    let Some((first, rest)) = events.split_first() else {
        return Err(corrupt(batch_number, "empty log"));
    };
    if !matches!(first.kind, BatchEventKind::BatchCreated { .. }) {
        return Err(corrupt(batch_number, format!("first event is {}", first.event_type())));
    }
    let mut batch = machine::start_batch(batch_number, flow, &first.actor(), first.timestamp)?;

    for ev in rest {
        let actor = ev.actor();
        match &ev.kind {
            BatchEventKind::StepCompleted { node_id, template_id, .. } => {
                let submission = StepSubmission { node_id: node_id.clone(),
                                                  template_id: Some(template_id.clone()),
                                                  payload: ev.data.clone() };
                let template = catalog.get_template(template_id);
                machine::complete_step(&mut batch, flow, template.as_ref(), &submission, &actor, ev.timestamp, config)?;
            }
            // lo emite complete_step al llegar al nodo terminal
            BatchEventKind::BatchCompleted => {}
            BatchEventKind::HoldPlaced { reason } => {
                machine::place_hold(&mut batch, reason.clone(), &actor, ev.timestamp)?
            }
            BatchEventKind::HoldReleased => machine::release_hold(&mut batch, &actor, ev.timestamp)?,
            BatchEventKind::Reassigned { to, .. } => machine::reassign(&mut batch, to, &actor, ev.timestamp),
            BatchEventKind::BatchCreated { .. } => {
                return Err(corrupt(batch_number, format!("batch_created repeated at seq {}", ev.seq)));
            }
        }
    }
    debug!("replay:rebuilt batch={batch_number} events={}", events.len());
    Ok(batch)
}

/// Reconstruye `stored` desde su propio log y compara los campos derivados.
pub fn replay<C>(stored: &Batch, flow: &Flow, catalog: &C, config: &EngineConfig) -> Result<ReplayReport, CoreEngineError>
    where C: TemplateCatalog + ?Sized
{
    let rebuilt = rebuild(&stored.batch_number, &stored.events, flow, catalog, config)?;
    let mut mismatches = Vec::new();
    if rebuilt.status != stored.status {
        mismatches.push("status");
    }
    if rebuilt.current_node_id != stored.current_node_id {
        mismatches.push("current_node_id");
    }
    if rebuilt.completed_node_ids != stored.completed_node_ids {
        mismatches.push("completed_node_ids");
    }
    if rebuilt.completed_at != stored.completed_at {
        mismatches.push("completed_at");
    }
    if rebuilt.assigned_to != stored.assigned_to {
        mismatches.push("assigned_to");
    }
    if rebuilt.metrics != stored.metrics {
        mismatches.push("metrics");
    }
    if rebuilt.flags != stored.flags {
        mismatches.push("flags");
    }
    if rebuilt.events.len() != stored.events.len() {
        mismatches.push("events");
    }
    if !mismatches.is_empty() {
        warn!("replay:mismatch batch={} fields={:?}", stored.batch_number, mismatches);
    }
    Ok(ReplayReport { rebuilt, mismatches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryTemplateCatalog;
    use crate::graph::definition_hash;
    use chrono::{Duration, TimeZone, Utc};
    use refine_domain::{Actor, FlowStatus, NodeKind, Pipeline, Template, TemplateType};
    use serde_json::json;

    fn setup() -> (Flow, InMemoryTemplateCatalog) {
        let mut flow = Flow::new_draft("gold", Pipeline::Gold, "admin", Utc::now())
            .with_node("recv", NodeKind::Station, "t-recv")
            .with_node("cast", NodeKind::Station, "t-cast")
            .with_node("rec", NodeKind::Station, "t-rec")
            .with_edge("recv", "cast")
            .with_edge("cast", "rec");
        flow.status = FlowStatus::Active;
        flow.definition_hash = Some(definition_hash(&flow));
        let catalog = InMemoryTemplateCatalog::from_templates([Template::new("t-recv", TemplateType::MassCheck, "Receiving"),
                                                               Template::new("t-cast", TemplateType::MassCheck, "Casting"),
                                                               Template::new("t-rec", TemplateType::MassCheck, "Recovery")]);
        (flow, catalog)
    }

    fn run(flow: &Flow, catalog: &InMemoryTemplateCatalog, cfg: &EngineConfig) -> Batch {
        let a = Actor::new("u-1", "ana");
        let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap();
        let mut b = machine::start_batch("G-1", flow, &a, t0).unwrap();
        let steps = [("recv", json!({"measured_mass": 1000, "purity": 90}), 0),
                     ("cast", json!({"output_weight": 850}), 26),
                     ("rec", json!({"pour_weight": 30}), 50)];
        for (node, payload, h) in steps {
            let node_tpl = flow.node(node).map(|n| n.template_id.clone()).unwrap();
            let tpl = catalog.get_template(&node_tpl);
            machine::complete_step(&mut b,
                                   flow,
                                   tpl.as_ref(),
                                   &StepSubmission::new(node, payload),
                                   &a,
                                   t0 + Duration::hours(h),
                                   cfg).unwrap();
            if node == "cast" {
                machine::reassign(&mut b, "jose", &a, t0 + Duration::hours(h));
            }
        }
        b
    }

    #[test]
    fn replay_reproduces_stored_metrics() {
        let (flow, catalog) = setup();
        let cfg = EngineConfig::default();
        let stored = run(&flow, &catalog, &cfg);
        let report = replay(&stored, &flow, &catalog, &cfg).unwrap();
        assert!(report.is_consistent(), "mismatches: {:?}", report.mismatches);
        assert_eq!(report.rebuilt.metrics, stored.metrics);
        assert_eq!(report.rebuilt.assigned_to.as_deref(), Some("jose"));
    }

    #[test]
    fn tampered_metrics_are_reported() {
        let (flow, catalog) = setup();
        let cfg = EngineConfig::default();
        let mut stored = run(&flow, &catalog, &cfg);
        stored.metrics.total_recovery_g = Some(1.0);
        let report = replay(&stored, &flow, &catalog, &cfg).unwrap();
        assert_eq!(report.mismatches, vec!["metrics"]);
    }

    #[test]
    fn log_must_start_with_creation() {
        let (flow, catalog) = setup();
        let cfg = EngineConfig::default();
        let stored = run(&flow, &catalog, &cfg);
        let err = rebuild("G-1", &stored.events[1..], &flow, &catalog, &cfg).unwrap_err();
        assert!(matches!(err, CoreEngineError::CorruptLog { .. }));
        assert!(rebuild("G-1", &[], &flow, &catalog, &cfg).is_err());
    }
}
