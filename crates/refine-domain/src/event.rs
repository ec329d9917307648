//! Eventos inmutables del batch.
//!
//! Rol en el flujo:
//! - Cada transición aplicada a un batch agrega uno o más `BatchEvent` a su
//!   log append-only.
//! - El log es la fuente de verdad: los campos derivados del batch deben
//!   poder reconstruirse reproduciendo los `StepCompleted` en orden
//!   (ver `refine-core::replay`).
//! - Las correcciones se modelan como eventos nuevos; nunca se edita ni se
//!   borra un evento existente.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Operador que origina una transición.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub username: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self { user_id: user_id.into(),
               username: username.into() }
    }
}

/// Tipos de evento soportados. El tag `type` es el contrato estable que se
/// persiste (`batch_created`, `step_completed`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEventKind {
    /// Primer evento de todo batch: fija el snapshot de Flow y el nodo de
    /// entrada.
    BatchCreated { flow_id: Uuid, flow_version: u32, entry_node_id: String },
    /// Un operador completó el nodo actual. `next_node_id` es `None` si el
    /// nodo era terminal. `rules` lista las reglas analíticas que aplicaron.
    StepCompleted {
        node_id: String,
        template_id: String,
        next_node_id: Option<String>,
        #[serde(default)]
        rules: Vec<String>,
    },
    /// Cierre del batch tras completar un nodo terminal.
    BatchCompleted,
    HoldPlaced {
        #[serde(default)]
        reason: Option<String>,
    },
    HoldReleased,
    /// Reasignación administrativa (permitida incluso con el batch cerrado).
    Reassigned { from: Option<String>, to: String },
}

impl BatchEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            BatchEventKind::BatchCreated { .. } => "batch_created",
            BatchEventKind::StepCompleted { .. } => "step_completed",
            BatchEventKind::BatchCompleted => "batch_completed",
            BatchEventKind::HoldPlaced { .. } => "hold_placed",
            BatchEventKind::HoldReleased => "hold_released",
            BatchEventKind::Reassigned { .. } => "reassigned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvent {
    pub event_id: Uuid,
    pub seq: u64, // posición dentro del log del batch (0-based)
    pub kind: BatchEventKind,
    pub user_id: String,
    pub username: String,
    pub timestamp: DateTime<Utc>,
    /// Payload libre del operador (sólo `StepCompleted` lo usa).
    #[serde(default)]
    pub data: Value,
}

impl BatchEvent {
    pub fn new(seq: u64, kind: BatchEventKind, actor: &Actor, timestamp: DateTime<Utc>, data: Value) -> Self {
        Self { event_id: Uuid::new_v4(),
               seq,
               kind,
               user_id: actor.user_id.clone(),
               username: actor.username.clone(),
               timestamp,
               data }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id.clone(), self.username.clone())
    }
}
