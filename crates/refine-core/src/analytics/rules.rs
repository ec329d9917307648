//! Tabla ordenada de reglas analíticas.
//!
//! La semántica de un step se infiere del nombre (en minúsculas) de su
//! plantilla. Cada regla es un par (predicado, efecto) y se evalúa en el
//! orden de `RULES`; ese orden es parte del contrato.
use chrono::{DateTime, Utc};
use refine_domain::{Batch, BatchFlag, BatchMetrics, RecoveryPour, Template, TemplateType};
use serde_json::Value;

use super::payload::{first_number, text, EXPECTED_MASS_KEY, FINE_PERCENT_KEYS, MASS_KEYS, OUTPUT_KEYS, POUR_KEYS};
use crate::clock::business_hours;
use crate::config::EngineConfig;

/// Observación de un step ya resuelta contra el catálogo.
pub struct StepInput<'a> {
    pub template: &'a Template,
    /// Nombre de plantilla en minúsculas.
    pub name: String,
    pub payload: &'a Value,
    pub now: DateTime<Utc>,
}

impl StepInput<'_> {
    fn name_has(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.name.contains(k))
    }
}

pub struct AnalyticsRule {
    pub name: &'static str,
    pub applies: fn(&StepInput<'_>) -> bool,
    /// Aplica el efecto; devuelve `true` si modificó el batch.
    pub apply: fn(&mut Batch, &StepInput<'_>, &EngineConfig) -> bool,
}

pub const ARRIVAL: &str = "arrival";
pub const RECEIVED_WEIGHT: &str = "received_weight";
pub const EXPECTED_OUTPUT: &str = "expected_output";
pub const FIRST_EXPORT: &str = "first_export";
pub const RECOVERY_POUR: &str = "recovery_pour";
pub const AGGREGATE: &str = "aggregate";
pub const LOSS_GAIN: &str = "loss_gain";

pub const RULES: &[AnalyticsRule] = &[AnalyticsRule { name: ARRIVAL,
                                                      applies: |i| i.name_has(&["melting", "receiving"]),
                                                      apply: apply_arrival },
                                      AnalyticsRule { name: RECEIVED_WEIGHT,
                                                      applies: |i| {
                                                          i.template.template_type == TemplateType::MassCheck
                                                          && i.name_has(&["receiving", "initial"])
                                                      },
                                                      apply: apply_received_weight },
                                      AnalyticsRule { name: EXPECTED_OUTPUT,
                                                      applies: |i| i.name_has(&["expected", "pre-cast", "target"]),
                                                      apply: apply_expected_output },
                                      AnalyticsRule { name: FIRST_EXPORT,
                                                      applies: |i| i.name_has(&["export", "first pour", "casting"]),
                                                      apply: apply_first_export },
                                      // independiente de FIRST_EXPORT: "casting recovery" registra dos pours
                                      AnalyticsRule { name: RECOVERY_POUR,
                                                      applies: |i| i.name_has(&["recovery"]),
                                                      apply: apply_recovery_pour },
                                      AnalyticsRule { name: AGGREGATE,
                                                      applies: |_| true,
                                                      apply: |b, _, _| recompute_totals(&mut b.metrics) },
                                      AnalyticsRule { name: LOSS_GAIN,
                                                      applies: |_| true,
                                                      apply: |b, _, cfg| recompute_loss_gain(&mut b.metrics, cfg.expected_recovery_ratio) }];

fn apply_arrival(batch: &mut Batch, input: &StepInput<'_>, _cfg: &EngineConfig) -> bool {
    let m = &mut batch.metrics;
    if m.melting_received_at.is_some() {
        return false;
    }
    m.melting_received_at = Some(input.now);
    if m.supplier.is_none() {
        m.supplier = text(input.payload, "supplier");
    }
    if m.drill_number.is_none() {
        m.drill_number = text(input.payload, "drill_number");
    }
    if m.destination.is_none() {
        m.destination = text(input.payload, "destination");
    }
    true
}

fn apply_received_weight(batch: &mut Batch, input: &StepInput<'_>, _cfg: &EngineConfig) -> bool {
    let mut changed = false;
    let mass = first_number(input.payload, MASS_KEYS);
    let m = &mut batch.metrics;
    if m.received_weight_g.is_none() && mass.is_some() {
        m.received_weight_g = mass;
        changed = true;
    }
    if m.fine_content_percent.is_none() {
        if let Some(pct) = first_number(input.payload, FINE_PERCENT_KEYS) {
            m.fine_content_percent = Some(pct);
            changed = true;
        }
    }
    // se calcula una sola vez; correcciones posteriores no lo recalculan
    if m.fine_grams_received.is_none() {
        if let (Some(w), Some(pct)) = (m.received_weight_g, m.fine_content_percent) {
            m.fine_grams_received = Some(w * pct / 100.0);
            changed = true;
        }
    }
    if let (Some(tol), Some(measured), Some(expected)) =
        (input.template.tolerance, mass, first_number(input.payload, &[EXPECTED_MASS_KEY]))
    {
        if (measured - expected).abs() > tol {
            changed |= batch.flags.insert(BatchFlag::MassOutsideTolerance);
        }
    }
    changed
}

fn apply_expected_output(batch: &mut Batch, input: &StepInput<'_>, _cfg: &EngineConfig) -> bool {
    let m = &mut batch.metrics;
    // un valor capturado gana siempre sobre el sintetizado por defecto
    if m.expected_output_g.is_some() && !m.expected_output_assumed {
        return false;
    }
    let Some(w) = first_number(input.payload, OUTPUT_KEYS) else {
        return false;
    };
    m.expected_output_g = Some(w);
    m.expected_output_assumed = false;
    true
}

fn apply_first_export(batch: &mut Batch, input: &StepInput<'_>, _cfg: &EngineConfig) -> bool {
    let m = &mut batch.metrics;
    if m.first_export_at.is_some() {
        return false;
    }
    let Some(w) = first_number(input.payload, OUTPUT_KEYS) else {
        return false;
    };
    m.first_export_at = Some(input.now);
    m.output_weight_g = Some(w);
    m.first_time_recovery_g = Some(w);
    push_pour(m, w, input.now);
    if let Some(start) = m.melting_received_at {
        m.ftt_hours = Some(f64::from(business_hours(start, input.now)));
    }
    true
}

fn apply_recovery_pour(batch: &mut Batch, input: &StepInput<'_>, _cfg: &EngineConfig) -> bool {
    let Some(w) = first_number(input.payload, POUR_KEYS) else {
        return false;
    };
    push_pour(&mut batch.metrics, w, input.now);
    true
}

fn push_pour(m: &mut BatchMetrics, weight_g: f64, now: DateTime<Utc>) {
    let pour_number = m.recovery_pours.len() as u32 + 1;
    m.recovery_pours.push(RecoveryPour { weight_g,
                                         timestamp: now,
                                         pour_number });
}

/// Total recuperado y % global a partir del ledger de pours.
pub(crate) fn recompute_totals(m: &mut BatchMetrics) -> bool {
    if m.recovery_pours.is_empty() {
        return false;
    }
    let total: f64 = m.recovery_pours.iter().map(|p| p.weight_g).sum();
    m.total_recovery_g = Some(total);
    if let Some(fine) = m.fine_grams_received.filter(|f| *f > 0.0) {
        m.overall_recovery_percent = Some(total / fine * 100.0);
    }
    true
}

/// Pérdida/ganancia contra el output esperado. Si nunca se capturó, se
/// sintetiza una única vez como `fine_grams_received * ratio`.
pub(crate) fn recompute_loss_gain(m: &mut BatchMetrics, expected_recovery_ratio: f64) -> bool {
    let Some(total) = m.total_recovery_g else {
        return false;
    };
    if m.expected_output_g.is_none() {
        if let Some(fine) = m.fine_grams_received {
            m.expected_output_g = Some(fine * expected_recovery_ratio);
            m.expected_output_assumed = true;
        }
    }
    let Some(expected) = m.expected_output_g else {
        return false;
    };
    let loss_gain = total - expected;
    m.actual_output_g = Some(total);
    m.loss_gain_g = Some(loss_gain);
    m.loss_gain_percent = (expected != 0.0).then(|| loss_gain / expected * 100.0);
    true
}
