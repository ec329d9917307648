//! Filas Diesel y su mapeo a/desde el dominio.
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use refine_domain::{Batch, BatchEvent, Flow};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::schema::{batch_events, batches, flows};

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = flows)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlowRow {
    pub flow_id: Uuid,
    pub version: i32,
    pub name: String,
    pub pipeline: String,
    pub status: String,
    pub nodes: Value,
    pub edges: Value,
    pub entry_node_id: Option<String>,
    pub effective_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub definition_hash: Option<String>,
}

impl FlowRow {
    pub fn from_flow(flow: &Flow) -> Result<Self, PersistenceError> {
        Ok(Self { flow_id: flow.flow_id,
                  version: version_to_db(flow.version)?,
                  name: flow.name.clone(),
                  pipeline: flow.pipeline.as_str().to_string(),
                  status: flow.status.as_str().to_string(),
                  nodes: serde_json::to_value(&flow.nodes)?,
                  edges: serde_json::to_value(&flow.edges)?,
                  entry_node_id: flow.entry_node_id.clone(),
                  effective_date: flow.effective_date,
                  created_by: flow.created_by.clone(),
                  created_at: flow.created_at,
                  definition_hash: flow.definition_hash.clone() })
    }

    pub fn into_flow(self) -> Result<Flow, PersistenceError> {
        Ok(Flow { flow_id: self.flow_id,
                  version: u32::try_from(self.version).map_err(|_| {
                                                         PersistenceError::Serialization(format!("negative flow version {}",
                                                                                                 self.version))
                                                     })?,
                  name: self.name,
                  pipeline: self.pipeline.parse()?,
                  status: self.status.parse()?,
                  nodes: serde_json::from_value(self.nodes)?,
                  edges: serde_json::from_value(self.edges)?,
                  entry_node_id: self.entry_node_id,
                  effective_date: self.effective_date,
                  created_by: self.created_by,
                  created_at: self.created_at,
                  definition_hash: self.definition_hash })
    }
}

pub fn version_to_db(version: u32) -> Result<i32, PersistenceError> {
    i32::try_from(version).map_err(|_| PersistenceError::Serialization(format!("flow version {version} out of range")))
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = batches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BatchRow {
    pub id: Uuid,
    pub batch_number: String,
    pub pipeline: String,
    pub flow_id: Uuid,
    pub flow_version: i32,
    pub status: String,
    pub version: i64,
    pub document: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = batches)]
pub struct NewBatchRow<'a> {
    pub id: Uuid,
    pub batch_number: &'a str,
    pub pipeline: &'a str,
    pub flow_id: Uuid,
    pub flow_version: i32,
    pub status: &'a str,
    pub version: i64,
    pub document: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Documento almacenado en `batches.document`: el agregado sin su log.
pub fn batch_document(batch: &Batch) -> Result<Value, PersistenceError> {
    let mut doc = serde_json::to_value(batch)?;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("events".into(), Value::Array(Vec::new()));
    }
    Ok(doc)
}

impl BatchRow {
    /// Rehidrata el agregado; `events` se completa aparte desde `batch_events`.
    pub fn into_batch(self, events: Vec<BatchEvent>) -> Result<Batch, PersistenceError> {
        let mut batch: Batch = serde_json::from_value(self.document)?;
        batch.version = u64::try_from(self.version).unwrap_or_default();
        batch.events = events;
        Ok(batch)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = batch_events)]
pub struct NewBatchEventRow<'a> {
    pub event_id: Uuid,
    pub batch_id: Uuid,
    pub event_seq: i64,
    pub event_type: &'a str,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

impl<'a> NewBatchEventRow<'a> {
    pub fn from_event(batch_id: Uuid, ev: &'a BatchEvent) -> Result<Self, PersistenceError> {
        Ok(Self { event_id: ev.event_id,
                  batch_id,
                  event_seq: ev.seq as i64,
                  event_type: ev.event_type(),
                  payload: serde_json::to_value(ev)?,
                  ts: ev.timestamp })
    }
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = batch_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BatchEventRow {
    pub seq: i64,
    pub event_id: Uuid,
    pub batch_id: Uuid,
    pub event_seq: i64,
    pub event_type: String,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

impl BatchEventRow {
    pub fn into_event(self) -> Result<BatchEvent, PersistenceError> {
        Ok(serde_json::from_value(self.payload)?)
    }
}
