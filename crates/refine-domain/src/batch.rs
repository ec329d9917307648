//! Agregado `Batch`: una unidad física de material recorriendo un Flow.
//!
//! El agregado se lee y escribe como documento completo; `version` es el
//! token de concurrencia optimista que incrementa cada commit.
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Actor, BatchEvent, BatchEventKind, DomainError, FlowKey, Pipeline};

/// Estado del ciclo de vida de un batch.
///
/// Las transiciones válidas son:
/// - `Created` -> `InProgress` (primer step completado)
/// - `Created` | `InProgress` -> `Completed` (nodo terminal)
/// - `InProgress` -> `OnHold` -> `InProgress` (override administrativo)
///
/// `Completed` es terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Created,
    InProgress,
    Completed,
    OnHold,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Created => "created",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::OnHold => "on_hold",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(BatchStatus::Created),
            "in_progress" => Ok(BatchStatus::InProgress),
            "completed" => Ok(BatchStatus::Completed),
            "on_hold" => Ok(BatchStatus::OnHold),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

/// Un pesaje discreto de material recuperado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPour {
    pub weight_g: f64,
    pub timestamp: DateTime<Utc>,
    /// Posición 1-based dentro de la secuencia de pours del batch.
    pub pour_number: u32,
}

/// Marcadores de anomalía derivados de las métricas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFlag {
    /// `expected_output_g` fue sintetizado con el ratio de recuperación por
    /// defecto.
    ExpectedOutputAssumed,
    LossBeyondTolerance,
    RecoveryAboveFineContent,
    /// Un pesaje de recepción se desvió más que la tolerancia de su plantilla.
    MassOutsideTolerance,
}

/// Campos cuantitativos derivados de las observaciones de cada step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub melting_received_at: Option<DateTime<Utc>>,
    pub supplier: Option<String>,
    pub drill_number: Option<String>,
    pub destination: Option<String>,
    pub received_weight_g: Option<f64>,
    pub fine_content_percent: Option<f64>,
    pub fine_grams_received: Option<f64>,
    pub expected_output_g: Option<f64>,
    #[serde(default)]
    pub expected_output_assumed: bool,
    pub first_export_at: Option<DateTime<Utc>>,
    pub output_weight_g: Option<f64>,
    pub first_time_recovery_g: Option<f64>,
    pub ftt_hours: Option<f64>,
    #[serde(default)]
    pub recovery_pours: Vec<RecoveryPour>,
    pub total_recovery_g: Option<f64>,
    pub overall_recovery_percent: Option<f64>,
    pub actual_output_g: Option<f64>,
    pub loss_gain_g: Option<f64>,
    pub loss_gain_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub batch_number: String,
    pub pipeline: Pipeline,
    pub flow_id: Uuid,
    pub flow_version: u32,
    /// Hash de la definición de Flow vigente al crear el batch.
    pub definition_hash: String,
    pub status: BatchStatus,
    /// `None` sólo cuando el batch está completado (centinela terminal).
    pub current_node_id: Option<String>,
    pub completed_node_ids: Vec<String>,
    pub events: Vec<BatchEvent>,
    #[serde(default)]
    pub metrics: BatchMetrics,
    #[serde(default)]
    pub flags: BTreeSet<BatchFlag>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Batch {
    /// Crea el agregado en estado `Created` posicionado en `entry_node_id`.
    /// No agrega eventos; el llamador emite `BatchCreated`.
    pub fn new(batch_number: impl Into<String>,
               pipeline: Pipeline,
               flow: FlowKey,
               definition_hash: impl Into<String>,
               entry_node_id: impl Into<String>,
               created_by: &Actor,
               now: DateTime<Utc>)
               -> Self {
        Self { id: Uuid::new_v4(),
               batch_number: batch_number.into(),
               pipeline,
               flow_id: flow.flow_id,
               flow_version: flow.version,
               definition_hash: definition_hash.into(),
               status: BatchStatus::Created,
               current_node_id: Some(entry_node_id.into()),
               completed_node_ids: Vec::new(),
               events: Vec::new(),
               metrics: BatchMetrics::default(),
               flags: BTreeSet::new(),
               assigned_to: None,
               created_by: created_by.user_id.clone(),
               created_at: now,
               completed_at: None,
               version: 0 }
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(self.flow_id, self.flow_version)
    }

    /// Instante del último evento del log (o de creación si está vacío).
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.events.last().map_or(self.created_at, |ev| ev.timestamp)
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Agrega un evento al final del log y lo devuelve.
    pub fn push_event(&mut self, kind: BatchEventKind, actor: &Actor, now: DateTime<Utc>, data: Value) -> &BatchEvent {
        let seq = self.events.len() as u64;
        self.events.push(BatchEvent::new(seq, kind, actor, now, data));
        &self.events[self.events.len() - 1]
    }
}
