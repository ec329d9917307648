//! Catálogo de plantillas (colaborador externo, sólo lectura).
//!
//! El motor sólo necesita `get_template`. Un `None` no es un error: el step
//! avanza igual y se omite la derivación analítica.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::debug;
use refine_domain::Template;

use crate::clock::Clock;

pub trait TemplateCatalog: Send + Sync {
    fn get_template(&self, template_id: &str) -> Option<Template>;
}

impl<T: TemplateCatalog + ?Sized> TemplateCatalog for Arc<T> {
    fn get_template(&self, template_id: &str) -> Option<Template> {
        (**self).get_template(template_id)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryTemplateCatalog {
    templates: HashMap<String, Template>,
}

impl InMemoryTemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates<I>(templates: I) -> Self
        where I: IntoIterator<Item = Template>
    {
        Self { templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect() }
    }

    /// Carga un arreglo JSON de plantillas (formato del catálogo externo).
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let templates: Vec<Template> = serde_json::from_str(raw)?;
        Ok(Self::from_templates(templates))
    }

    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateCatalog for InMemoryTemplateCatalog {
    fn get_template(&self, template_id: &str) -> Option<Template> {
        self.templates.get(template_id).cloned()
    }
}

/// Cache con TTL delante de otro catálogo. Tolera consistencia eventual:
/// los catálogos cambian poco y fuera de banda. También cachea misses.
pub struct CachedTemplateCatalog<C: TemplateCatalog> {
    inner: C,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, (Option<Template>, DateTime<Utc>)>,
}

impl<C: TemplateCatalog> CachedTemplateCatalog<C> {
    pub fn new(inner: C, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { inner,
               ttl,
               clock,
               entries: DashMap::new() }
    }

    pub fn invalidate(&self, template_id: &str) {
        self.entries.remove(template_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<C: TemplateCatalog> TemplateCatalog for CachedTemplateCatalog<C> {
    fn get_template(&self, template_id: &str) -> Option<Template> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(template_id) {
            let (cached, fetched_at) = entry.value();
            if now - *fetched_at < self.ttl {
                return cached.clone();
            }
        }
        debug!("template cache miss id={template_id}");
        let fresh = self.inner.get_template(template_id);
        self.entries.insert(template_id.to_string(), (fresh.clone(), now));
        fresh
    }
}
