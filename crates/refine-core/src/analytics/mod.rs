//! Cálculo analítico por step.
//!
//! `apply_step_analytics` recorre la tabla `rules::RULES` para la plantilla
//! del step recién completado y deja en el batch las métricas derivadas y los
//! flags refrescados. Es una función pura sobre el batch: no toca stores ni
//! reloj, así que el replay la puede reutilizar tal cual.
pub mod payload;
pub mod rules;

use chrono::{DateTime, Utc};
use log::debug;
use refine_domain::{Batch, BatchFlag, Template};
use serde_json::Value;

use crate::config::EngineConfig;
use rules::{recompute_loss_gain, recompute_totals, StepInput, RULES};

/// Resultado del cálculo de un step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsReport {
    /// Reglas que modificaron el batch, en orden de evaluación.
    pub fired: Vec<&'static str>,
    /// `true` si no se pudo resolver la plantilla y no se derivó nada.
    pub skipped: bool,
}

impl AnalyticsReport {
    pub fn skipped() -> Self {
        Self { fired: Vec::new(),
               skipped: true }
    }

    pub fn has_fired(&self, rule: &str) -> bool {
        self.fired.iter().any(|r| *r == rule)
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.fired.iter().map(|r| r.to_string()).collect()
    }
}

/// Aplica las reglas al batch para el step observado.
///
/// Sin plantilla (`None`) el step no deriva nada; el avance en el grafo no
/// depende de esto.
pub fn apply_step_analytics(batch: &mut Batch,
                            template: Option<&Template>,
                            payload: &Value,
                            now: DateTime<Utc>,
                            config: &EngineConfig)
                            -> AnalyticsReport {
    let Some(template) = template else {
        debug!("analytics:skip batch={} reason=template_not_found", batch.batch_number);
        return AnalyticsReport::skipped();
    };
    let input = StepInput { template,
                            name: template.normalized_name(),
                            payload,
                            now };
    let mut report = AnalyticsReport::default();
    for rule in RULES {
        if (rule.applies)(&input) && (rule.apply)(batch, &input, config) {
            report.fired.push(rule.name);
        }
    }
    refresh_flags(batch, config);
    debug!("analytics:done batch={} template={} fired={:?}",
           batch.batch_number, template.id, report.fired);
    report
}

/// Recalcula agregados y pérdida/ganancia sin observación nueva. Se usa al
/// completar el batch para que el fallback del output esperado quede aplicado
/// aunque el último step no haya sido de recuperación.
pub fn finalize_analytics(batch: &mut Batch, config: &EngineConfig) {
    recompute_totals(&mut batch.metrics);
    recompute_loss_gain(&mut batch.metrics, config.expected_recovery_ratio);
    refresh_flags(batch, config);
}

/// Recalcula los flags derivados de las métricas. `MassOutsideTolerance` se
/// fija en la regla de recepción y no se limpia aquí.
pub fn refresh_flags(batch: &mut Batch, config: &EngineConfig) {
    let m = &batch.metrics;
    let assumed = m.expected_output_assumed;
    let loss = m.loss_gain_percent.is_some_and(|p| p < -config.loss_tolerance_percent);
    let above = m.overall_recovery_percent.is_some_and(|p| p > 100.0);
    toggle(batch, BatchFlag::ExpectedOutputAssumed, assumed);
    toggle(batch, BatchFlag::LossBeyondTolerance, loss);
    toggle(batch, BatchFlag::RecoveryAboveFineContent, above);
}

fn toggle(batch: &mut Batch, flag: BatchFlag, on: bool) {
    if on {
        batch.flags.insert(flag);
    } else {
        batch.flags.remove(&flag);
    }
}

/// Recuperación a la primera (FTT) como % de los gramos finos recibidos.
/// Proyección de lectura; no se persiste.
pub fn ftt_recovery_percent(batch: &Batch) -> Option<f64> {
    let m = &batch.metrics;
    let fine = m.fine_grams_received.filter(|f| *f > 0.0)?;
    m.first_time_recovery_g.map(|ftt| ftt / fine * 100.0)
}
