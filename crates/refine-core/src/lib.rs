//! refine-core: motor de ejecución de batches y analítica de refinado
pub mod analytics;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod hashing;
pub mod machine;
pub mod replay;
pub mod store;

pub use analytics::{apply_step_analytics, finalize_analytics, ftt_recovery_percent, AnalyticsReport};
pub use catalog::{CachedTemplateCatalog, InMemoryTemplateCatalog, TemplateCatalog};
pub use clock::{business_hours, Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{BatchEngine, EngineBuilder};
pub use errors::{CoreEngineError, GraphError, StoreError};
pub use graph::{definition_hash, entry_node, is_terminal, next_nodes, validate, FlowGraph};
pub use machine::{StepOutcome, StepSubmission};
pub use replay::{replay, ReplayReport};
pub use store::{BatchStore, FlowStore, InMemoryBatchStore, InMemoryFlowStore};
