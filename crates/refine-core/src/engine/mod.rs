//! Servicio del motor: une stores, catálogo, reloj y máquina de estados.
//!
//! - `core`: operaciones sobre batches (crear, completar steps, holds,
//!   reasignación, auditoría) con commit optimista y reintento.
//! - `flows`: ciclo de vida de versiones de Flow.
//! - `builder`: construcción del motor.

pub mod builder;
pub mod core;
mod flows;

pub use builder::EngineBuilder;
pub use core::BatchEngine;
