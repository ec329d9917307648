//! refineflow
//!
//! Fachada del workspace:
//! - `domain`: modelo (Flow, Batch, eventos, plantillas).
//! - `engine`: grafo, analítica, máquina de estados y `BatchEngine`.
//! - `persistence` (feature `postgres`): stores Diesel/Postgres.
//!
//! ```ignore
//! use refineflow::prelude::*;
//! let engine = BatchEngine::in_memory(InMemoryTemplateCatalog::new()).build();
//! ```

pub mod error;

pub use refine_core as engine;
pub use refine_domain as domain;
#[cfg(feature = "postgres")]
pub use refine_persistence as persistence;

pub use error::{RefineError, Result};

/// Tipos de uso frecuente.
pub mod prelude {
    pub use refine_core::{business_hours, ftt_recovery_percent, BatchEngine, BatchStore, CachedTemplateCatalog, Clock,
                          CoreEngineError, EngineConfig, FixedClock, FlowStore, InMemoryBatchStore, InMemoryFlowStore,
                          InMemoryTemplateCatalog, ReplayReport, StepOutcome, StepSubmission, SystemClock,
                          TemplateCatalog};
    pub use refine_domain::{Actor, Batch, BatchEvent, BatchEventKind, BatchFlag, BatchMetrics, BatchStatus, Flow, FlowKey,
                            FlowStatus, NodeKind, Pipeline, Template, TemplateType};

    pub use crate::error::{RefineError, Result};
}
