//! Configuración del motor desde variables de entorno (.env opcional).
//!
//! Variables:
//! - `REFINE_EXPECTED_RECOVERY_RATIO` (default 0.995)
//! - `REFINE_LOSS_TOLERANCE_PERCENT` (default 1.0)
//! - `REFINE_MAX_COMMIT_RETRIES` (default 3)
//! - `REFINE_TEMPLATE_CACHE_TTL_SECS` (default 300)

use std::env;
use std::str::FromStr;

use dotenvy::dotenv;
use log::warn;
use once_cell::sync::Lazy;

use crate::constants::{DEFAULT_EXPECTED_RECOVERY_RATIO, DEFAULT_LOSS_TOLERANCE_PERCENT, DEFAULT_MAX_COMMIT_RETRIES,
                       DEFAULT_TEMPLATE_CACHE_TTL_SECS};

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Fracción de `fine_grams_received` usada como output esperado cuando
    /// ningún step lo capturó.
    pub expected_recovery_ratio: f64,
    pub loss_tolerance_percent: f64,
    pub max_commit_retries: u32,
    pub template_cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { expected_recovery_ratio: DEFAULT_EXPECTED_RECOVERY_RATIO,
               loss_tolerance_percent: DEFAULT_LOSS_TOLERANCE_PERCENT,
               max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
               template_cache_ttl_secs: DEFAULT_TEMPLATE_CACHE_TTL_SECS }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Self
        where F: Fn(&str) -> Option<String>
    {
        let d = Self::default();
        Self { expected_recovery_ratio: parse_or(&lookup, "REFINE_EXPECTED_RECOVERY_RATIO", d.expected_recovery_ratio),
               loss_tolerance_percent: parse_or(&lookup, "REFINE_LOSS_TOLERANCE_PERCENT", d.loss_tolerance_percent),
               max_commit_retries: parse_or(&lookup, "REFINE_MAX_COMMIT_RETRIES", d.max_commit_retries),
               template_cache_ttl_secs: parse_or(&lookup, "REFINE_TEMPLATE_CACHE_TTL_SECS", d.template_cache_ttl_secs) }
    }

    pub fn with_expected_recovery_ratio(mut self, ratio: f64) -> Self {
        self.expected_recovery_ratio = ratio;
        self
    }

    pub fn with_max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
    where F: Fn(&str) -> Option<String>,
          T: FromStr + Copy
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                                           warn!("config: {key}={raw:?} no es válido, usando default");
                                           default
                                       }),
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_vars_fall_back_to_defaults() {
        let cfg = EngineConfig::from_lookup(|_| None);
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.expected_recovery_ratio, 0.995);
    }

    #[test]
    fn overrides_and_bad_values() {
        let vars: HashMap<&str, &str> = HashMap::from([("REFINE_EXPECTED_RECOVERY_RATIO", "0.98"),
                                                       ("REFINE_MAX_COMMIT_RETRIES", "not-a-number")]);
        let cfg = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.expected_recovery_ratio, 0.98);
        assert_eq!(cfg.max_commit_retries, DEFAULT_MAX_COMMIT_RETRIES);
    }
}
