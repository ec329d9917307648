//! Forma de una plantilla de estación/check tal como la entrega el catálogo
//! externo. El motor sólo la consulta; nunca la crea ni la modifica.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    Instruction,
    Checklist,
    MassCheck,
    Signature,
    Photo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    #[serde(rename = "type")]
    pub template_type: TemplateType,
    pub name: String,
    #[serde(default)]
    pub tolerance: Option<f64>,
}

impl Template {
    pub fn new(id: impl Into<String>, template_type: TemplateType, name: impl Into<String>) -> Self {
        Self { id: id.into(),
               template_type,
               name: name.into(),
               tolerance: None }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Nombre en minúsculas usado para la clasificación por subcadena.
    pub fn normalized_name(&self) -> String {
        self.name.to_lowercase()
    }
}
