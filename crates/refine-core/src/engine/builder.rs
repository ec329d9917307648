//! Builder para `BatchEngine`.
//!
//! Los stores y el catálogo son obligatorios y se fijan al crear el builder;
//! reloj y configuración tienen default (`SystemClock`,
//! `EngineConfig::default()`).
//!
//! ```ignore
//! let engine = BatchEngine::in_memory(catalog)
//!     .clock(Arc::new(FixedClock::new(t0)))
//!     .config(EngineConfig::from_env())
//!     .build();
//! ```
use std::sync::Arc;

use crate::catalog::TemplateCatalog;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::engine::BatchEngine;
use crate::store::{BatchStore, FlowStore};

pub struct EngineBuilder<B: BatchStore, F: FlowStore, T: TemplateCatalog> {
    batches: B,
    flows: F,
    catalog: T,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl<B: BatchStore, F: FlowStore, T: TemplateCatalog> EngineBuilder<B, F, T> {
    pub(crate) fn new(batches: B, flows: F, catalog: T) -> Self {
        Self { batches,
               flows,
               catalog,
               clock: None,
               config: EngineConfig::default() }
    }

    #[inline]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[inline]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> BatchEngine<B, F, T> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        BatchEngine::from_parts(self.batches, self.flows, self.catalog, clock, self.config)
    }
}
