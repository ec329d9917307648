//! Definición versionada de un proceso (Flow).
//!
//! Un `Flow` describe, para un pipeline concreto, el grafo de estaciones y
//! checks por el que avanza un batch. La identidad estable es `flow_id`; cada
//! edición publicada genera una nueva `version`. Los batches fijan la pareja
//! (`flow_id`, `version`) al crearse y nunca siguen ediciones posteriores.
//!
//! Este crate sólo modela los datos; la validación del grafo (DAG, entrada
//! única, aristas colgantes) vive en `refine-core::graph`.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DomainError;

/// Línea de proceso. Los valores conocidos tienen variante propia; cualquier
/// otro nombre (en minúsculas) se conserva en `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Pipeline {
    Copper,
    Silver,
    Gold,
    Other(String),
}

impl Pipeline {
    pub fn as_str(&self) -> &str {
        match self {
            Pipeline::Copper => "copper",
            Pipeline::Silver => "silver",
            Pipeline::Gold => "gold",
            Pipeline::Other(name) => name,
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => Err(DomainError::InvalidPipeline(s.to_string())),
            "copper" => Ok(Pipeline::Copper),
            "silver" => Ok(Pipeline::Silver),
            "gold" => Ok(Pipeline::Gold),
            _ => Ok(Pipeline::Other(normalized)),
        }
    }
}

impl TryFrom<String> for Pipeline {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pipeline> for String {
    fn from(p: Pipeline) -> Self {
        p.as_str().to_string()
    }
}

/// Estado de publicación de una versión de Flow.
///
/// Transiciones: `Draft` -> `Active` -> `Archived`. Un `Archived` puede
/// volver a activarse (rollback de proceso); sólo `Draft` es editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Draft,
    Active,
    Archived,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Draft => "draft",
            FlowStatus::Active => "active",
            FlowStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(FlowStatus::Draft),
            "active" => Ok(FlowStatus::Active),
            "archived" => Ok(FlowStatus::Archived),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Station,
    Check,
}

/// Posición sugerida por el editor visual. No participa en el hash de la
/// definición.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutHint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub kind: NodeKind,
    pub template_id: String,
    #[serde(default)]
    pub layout_hint: Option<LayoutHint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowEdge {
    pub source_node_id: String,
    pub target_node_id: String,
}

/// Clave compuesta de una versión concreta de Flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub flow_id: Uuid,
    pub version: u32,
}

impl FlowKey {
    pub fn new(flow_id: Uuid, version: u32) -> Self {
        Self { flow_id, version }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.flow_id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: Uuid,
    pub version: u32,
    pub name: String,
    pub pipeline: Pipeline,
    pub status: FlowStatus,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    /// Entrada declarada; si es `None` se usa el único nodo sin aristas
    /// entrantes.
    #[serde(default)]
    pub entry_node_id: Option<String>,
    #[serde(default)]
    pub effective_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Hash de la definición, fijado al activar la versión.
    #[serde(default)]
    pub definition_hash: Option<String>,
}

impl Flow {
    /// Crea un borrador vacío (versión 1) con identidad nueva.
    pub fn new_draft(name: impl Into<String>, pipeline: Pipeline, created_by: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { flow_id: Uuid::new_v4(),
               version: 1,
               name: name.into(),
               pipeline,
               status: FlowStatus::Draft,
               nodes: Vec::new(),
               edges: Vec::new(),
               entry_node_id: None,
               effective_date: None,
               created_by: created_by.into(),
               created_at: now,
               definition_hash: None }
    }

    /// Añade un nodo (estilo builder).
    pub fn with_node(mut self, id: impl Into<String>, kind: NodeKind, template_id: impl Into<String>) -> Self {
        self.nodes.push(FlowNode { id: id.into(),
                                   kind,
                                   template_id: template_id.into(),
                                   layout_hint: None });
        self
    }

    /// Añade una arista `source -> target` (estilo builder).
    pub fn with_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(FlowEdge { source_node_id: source.into(),
                                   target_node_id: target.into() });
        self
    }

    pub fn with_entry(mut self, node_id: impl Into<String>) -> Self {
        self.entry_node_id = Some(node_id.into());
        self
    }

    pub fn key(&self) -> FlowKey {
        FlowKey::new(self.flow_id, self.version)
    }

    pub fn node(&self, node_id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn is_editable(&self) -> bool {
        self.status == FlowStatus::Draft
    }

    /// Copia esta definición como borrador de la versión indicada.
    pub fn to_draft_version(&self, version: u32, created_by: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { version,
               status: FlowStatus::Draft,
               created_by: created_by.into(),
               created_at: now,
               definition_hash: None,
               ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_parse_is_case_insensitive_and_extensible() {
        assert_eq!("Gold".parse::<Pipeline>().unwrap(), Pipeline::Gold);
        assert_eq!(" palladium ".parse::<Pipeline>().unwrap(), Pipeline::Other("palladium".into()));
        assert!("   ".parse::<Pipeline>().is_err());
    }

    #[test]
    fn pipeline_serializes_as_plain_string() {
        let v = serde_json::to_value(Pipeline::Silver).unwrap();
        assert_eq!(v, serde_json::json!("silver"));
        let p: Pipeline = serde_json::from_value(serde_json::json!("platinum")).unwrap();
        assert_eq!(p, Pipeline::Other("platinum".into()));
    }

    #[test]
    fn draft_version_copy_resets_publication_fields() {
        let now = Utc::now();
        let mut flow = Flow::new_draft("gold refining", Pipeline::Gold, "admin", now).with_node("a", NodeKind::Station, "t1");
        flow.status = FlowStatus::Active;
        flow.definition_hash = Some("abc".into());

        let draft = flow.to_draft_version(2, "editor", now);
        assert_eq!(draft.flow_id, flow.flow_id);
        assert_eq!(draft.version, 2);
        assert_eq!(draft.status, FlowStatus::Draft);
        assert!(draft.definition_hash.is_none());
        assert_eq!(draft.nodes, flow.nodes);
        assert!(draft.is_editable());
    }
}
