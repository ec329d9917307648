use diesel::prelude::*;
use log::{debug, error};
use refine_core::{BatchStore, StoreError};
use refine_domain::{Batch, BatchEvent, BatchStatus, FlowKey, FlowStatus};
use uuid::Uuid;

use super::rows::{batch_document, version_to_db, BatchEventRow, BatchRow, NewBatchEventRow, NewBatchRow};
use super::{with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::{batch_events, batches, flows};

/// `BatchStore` sobre Postgres.
pub struct PgBatchStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgBatchStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

fn insert_events(conn: &mut PgConnection, batch_id: Uuid, events: &[BatchEvent]) -> Result<(), PersistenceError> {
    let rows = events.iter()
                     .map(|ev| NewBatchEventRow::from_event(batch_id, ev))
                     .collect::<Result<Vec<_>, _>>()?;
    if !rows.is_empty() {
        diesel::insert_into(batch_events::table).values(&rows).execute(conn)?;
    }
    Ok(())
}

fn load_events(conn: &mut PgConnection, batch_id: Uuid) -> Result<Vec<BatchEvent>, PersistenceError> {
    batch_events::table.filter(batch_events::batch_id.eq(batch_id))
                       .order(batch_events::event_seq.asc())
                       .select(BatchEventRow::as_select())
                       .load(conn)?
                       .into_iter()
                       .map(BatchEventRow::into_event)
                       .collect()
}

fn hydrate(conn: &mut PgConnection, row: BatchRow) -> Result<Batch, PersistenceError> {
    let events = load_events(conn, row.id)?;
    row.into_batch(events)
}

impl<P: ConnectionProvider> BatchStore for PgBatchStore<P> {
    fn insert(&self, batch: &Batch) -> Result<(), StoreError> {
        debug!("insert:start batch={}", batch.batch_number);
        let document = batch_document(batch)?;
        let flow_version = version_to_db(batch.flow_version)?;
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    // FOR SHARE: una desactivación concurrente espera o ya se ve
                    let flow_status: String = flows::table.find((batch.flow_id, flow_version))
                                                          .select(flows::status)
                                                          .for_share()
                                                          .first(tx)?;
                    if flow_status != FlowStatus::Active.as_str() {
                        let status = flow_status.parse::<FlowStatus>()?;
                        return Err(PersistenceError::Rejected(StoreError::StatusChanged(status)));
                    }
                    let row = NewBatchRow { id: batch.id,
                                            batch_number: &batch.batch_number,
                                            pipeline: batch.pipeline.as_str(),
                                            flow_id: batch.flow_id,
                                            flow_version,
                                            status: batch.status.as_str(),
                                            version: 0,
                                            document: document.clone(),
                                            created_at: batch.created_at,
                                            updated_at: batch.last_activity_at() };
                    diesel::insert_into(batches::table).values(&row).execute(tx)?;
                    insert_events(tx, batch.id, &batch.events)
                })
        }).map_err(|e| {
              if let PersistenceError::UniqueViolation(_) = e {
                  return StoreError::Duplicate(batch.batch_number.clone());
              }
              error!("insert:error batch={} err={e}", batch.batch_number);
              e.into()
          })
    }

    fn load(&self, id: Uuid) -> Result<Batch, StoreError> {
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            let row = batches::table.find(id).select(BatchRow::as_select()).first(&mut conn)?;
            hydrate(&mut conn, row)
        })?)
    }

    fn load_by_number(&self, batch_number: &str) -> Result<Batch, StoreError> {
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            let row = batches::table.filter(batches::batch_number.eq(batch_number))
                                    .select(BatchRow::as_select())
                                    .first(&mut conn)?;
            hydrate(&mut conn, row)
        })?)
    }

    fn commit(&self, batch: &Batch, expected_version: u64, new_events: &[BatchEvent]) -> Result<u64, StoreError> {
        debug!("commit:start batch={} expected={expected_version} events={}",
               batch.batch_number,
               new_events.len());
        let document = batch_document(batch)?;
        let next = expected_version + 1;
        let res = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                // El filtro por versión es el control optimista.
                let updated = diesel::update(batches::table.filter(batches::id.eq(batch.id))
                                                           .filter(batches::version.eq(expected_version as i64)))
                    .set((batches::status.eq(batch.status.as_str()),
                          batches::version.eq(next as i64),
                          batches::document.eq(document.clone()),
                          batches::updated_at.eq(batch.last_activity_at())))
                    .execute(tx)?;
                if updated == 0 {
                    let found: Option<i64> = batches::table.find(batch.id)
                                                           .select(batches::version)
                                                           .first(tx)
                                                           .optional()?;
                    return Err(match found {
                                   Some(v) => PersistenceError::StaleVersion { expected: expected_version,
                                                                               found: v as u64 },
                                   None => PersistenceError::NotFound,
                               });
                }
                insert_events(tx, batch.id, new_events)?;
                Ok(next)
            })
        });
        match &res {
            Ok(v) => debug!("commit:done batch={} version={v}", batch.batch_number),
            Err(PersistenceError::StaleVersion { found, .. }) => {
                debug!("commit:stale batch={} expected={expected_version} found={found}", batch.batch_number)
            }
            Err(e) => error!("commit:error batch={} err={e}", batch.batch_number),
        }
        Ok(res?)
    }

    fn count_for_flow(&self, key: FlowKey, statuses: &[BatchStatus]) -> Result<usize, StoreError> {
        let flow_version = version_to_db(key.version)?;
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let count: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            Ok(batches::table.filter(batches::flow_id.eq(key.flow_id))
                             .filter(batches::flow_version.eq(flow_version))
                             .filter(batches::status.eq_any(statuses.clone()))
                             .count()
                             .get_result(&mut conn)?)
        })?;
        Ok(count as usize)
    }

    fn list_events(&self, id: Uuid) -> Result<Vec<BatchEvent>, StoreError> {
        Ok(with_retry(|| {
            let mut conn = self.provider.connection()?;
            load_events(&mut conn, id)
        })?)
    }
}
