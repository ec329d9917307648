use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::prelude::*;
use log::{debug, warn};
use refine_core::store::ACTIVE_STATUSES;
use refine_core::{definition_hash as hash_of, FlowStore, StoreError};
use refine_domain::{Flow, FlowKey, FlowStatus, Pipeline};
use uuid::Uuid;

use super::rows::{version_to_db, FlowRow};
use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::{batches, flows};

/// `FlowStore` sobre Postgres. Una fila por (flow_id, version).
pub struct PgFlowStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgFlowStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

fn key_of(flow_id: Uuid, version: i32) -> FlowKey {
    FlowKey::new(flow_id, version.max(0) as u32)
}

fn status_rejection(status: &str) -> PersistenceError {
    match status.parse::<FlowStatus>() {
        Ok(status) => PersistenceError::Rejected(StoreError::StatusChanged(status)),
        Err(e) => e.into(),
    }
}

/// Estado actual de la fila; `NotFound` si no existe.
fn stored_status(conn: &mut PgConnection, flow_id: Uuid, version: i32) -> Result<String, PersistenceError> {
    Ok(flows::table.find((flow_id, version)).select(flows::status).first(conn)?)
}

impl<P: ConnectionProvider> FlowStore for PgFlowStore<P> {
    fn insert(&self, flow: &Flow) -> Result<(), StoreError> {
        debug!("flow_insert:start key={}", flow.key());
        let row = FlowRow::from_flow(flow)?;
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(flows::table).values(&row).execute(&mut conn)?;
            Ok(())
        }).map_err(|e| match e {
              PersistenceError::UniqueViolation(_) => StoreError::Duplicate(flow.key().to_string()),
              other => other.into(),
          })
    }

    fn load(&self, key: FlowKey) -> Result<Flow, StoreError> {
        let version = version_to_db(key.version)?;
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            flows::table.find((key.flow_id, version))
                        .select(FlowRow::as_select())
                        .first(&mut conn)?
                        .into_flow()
        })?)
    }

    fn versions(&self, flow_id: Uuid) -> Result<Vec<Flow>, StoreError> {
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            flows::table.filter(flows::flow_id.eq(flow_id))
                        .order(flows::version.asc())
                        .select(FlowRow::as_select())
                        .load(&mut conn)?
                        .into_iter()
                        .map(FlowRow::into_flow)
                        .collect()
        })?)
    }

    fn latest_version(&self, flow_id: Uuid) -> Result<Option<u32>, StoreError> {
        let latest: Option<i32> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(flows::table.filter(flows::flow_id.eq(flow_id))
                           .select(max(flows::version))
                           .first(&mut conn)?)
        })?;
        Ok(latest.map(|v| v.max(0) as u32))
    }

    fn update_draft(&self, flow: &Flow) -> Result<(), StoreError> {
        let row = FlowRow::from_flow(flow)?;
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            let updated = diesel::update(flows::table.find((row.flow_id, row.version))
                                                     .filter(flows::status.eq(FlowStatus::Draft.as_str())))
                .set((flows::name.eq(&row.name),
                      flows::nodes.eq(row.nodes.clone()),
                      flows::edges.eq(row.edges.clone()),
                      flows::entry_node_id.eq(row.entry_node_id.clone())))
                .execute(&mut conn)?;
            if updated == 0 {
                let status = stored_status(&mut conn, row.flow_id, row.version)?;
                debug!("update_draft:not_draft key={} status={status}", flow.key());
                return Err(status_rejection(&status));
            }
            Ok(())
        })?)
    }

    fn active_for(&self, pipeline: &Pipeline) -> Result<Option<Flow>, StoreError> {
        let row: Option<FlowRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(flows::table.filter(flows::pipeline.eq(pipeline.as_str()))
                           .filter(flows::status.eq(FlowStatus::Active.as_str()))
                           .select(FlowRow::as_select())
                           .first(&mut conn)
                           .optional()?)
        })?;
        Ok(row.map(FlowRow::into_flow).transpose()?)
    }

    fn activate(&self,
                key: FlowKey,
                definition_hash: &str,
                effective_date: DateTime<Utc>)
                -> Result<Vec<FlowKey>, StoreError> {
        debug!("activate:start key={key}");
        let version = version_to_db(key.version)?;
        let archived = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                // FOR UPDATE: un update_draft concurrente espera al commit
                let target = flows::table.find((key.flow_id, version))
                                         .select(FlowRow::as_select())
                                         .for_update()
                                         .first(tx)?
                                         .into_flow()?;
                if target.status == FlowStatus::Active {
                    return Err(PersistenceError::Rejected(StoreError::StatusChanged(FlowStatus::Active)));
                }
                if hash_of(&target) != definition_hash {
                    debug!("activate:definition_changed key={key}");
                    return Err(PersistenceError::Rejected(StoreError::DefinitionChanged));
                }
                // Archivar primero: el índice único parcial admite una sola activa.
                let archived: Vec<(Uuid, i32)> =
                    diesel::update(flows::table.filter(flows::pipeline.eq(target.pipeline.as_str()))
                                               .filter(flows::status.eq(FlowStatus::Active.as_str())))
                        .set(flows::status.eq(FlowStatus::Archived.as_str()))
                        .returning((flows::flow_id, flows::version))
                        .get_results(tx)?;
                diesel::update(flows::table.find((key.flow_id, version)))
                    .set((flows::status.eq(FlowStatus::Active.as_str()),
                          flows::definition_hash.eq(definition_hash),
                          flows::effective_date.eq(effective_date)))
                    .execute(tx)?;
                Ok(archived)
            })
        })?;
        let archived: Vec<FlowKey> = archived.into_iter().map(|(id, v)| key_of(id, v)).collect();
        if !archived.is_empty() {
            warn!("activate:archived key={key} previous={archived:?}");
        }
        Ok(archived)
    }

    fn deactivate(&self, key: FlowKey) -> Result<(), StoreError> {
        let version = version_to_db(key.version)?;
        let live: Vec<&str> = ACTIVE_STATUSES.iter().map(|s| s.as_str()).collect();
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                // la inserción de batches toma FOR SHARE sobre esta fila
                let status: String = flows::table.find((key.flow_id, version))
                                                 .select(flows::status)
                                                 .for_update()
                                                 .first(tx)?;
                if status != FlowStatus::Active.as_str() {
                    return Err(status_rejection(&status));
                }
                let blocking: i64 = batches::table.filter(batches::flow_id.eq(key.flow_id))
                                                  .filter(batches::flow_version.eq(version))
                                                  .filter(batches::status.eq_any(live.clone()))
                                                  .count()
                                                  .get_result(tx)?;
                if blocking > 0 {
                    return Err(PersistenceError::Rejected(StoreError::InUse(blocking as usize)));
                }
                diesel::update(flows::table.find((key.flow_id, version)))
                    .set(flows::status.eq(FlowStatus::Archived.as_str()))
                    .execute(tx)?;
                Ok(())
            })
        })?;
        debug!("deactivate key={key}");
        Ok(())
    }

    fn delete(&self, key: FlowKey) -> Result<(), StoreError> {
        let version = version_to_db(key.version)?;
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            let deleted = diesel::delete(flows::table.find((key.flow_id, version))
                                                     .filter(flows::status.ne(FlowStatus::Active.as_str())))
                .execute(&mut conn)?;
            if deleted == 0 {
                return Err(status_rejection(&stored_status(&mut conn, key.flow_id, version)?));
            }
            Ok(())
        })?;
        debug!("delete key={key}");
        Ok(())
    }
}
