
use chrono::{DateTime, Duration, Utc};
use diesel::{QueryDsl, RunQueryDsl};
use refine_core::machine::{place_hold, start_batch};
use refine_core::store::{ACTIVE_STATUSES, ALL_STATUSES};
use refine_core::{definition_hash, BatchStore, FlowStore, StoreError};
use refine_domain::{Batch, BatchStatus, FlowStatus};
use refine_persistence::schema::batches;
use refine_persistence::{PgBatchStore, PgFlowStore, PgPool};
use test_support::*;

/// Batch nuevo sobre un Flow recién activado (aún sin insertar).
fn seeded_batch(pool: &PgPool) -> Batch {
    let flows = PgFlowStore::new(provider(pool));
    let flow = linear_flow(unique_pipeline());
    flows.insert(&flow).expect("flow insert");
    flows.activate(flow.key(), &definition_hash(&flow), t0()).expect("activate");
    start_batch(&unique_number("B"), &flow, &operator(), t0()).expect("start")
}

fn stored_updated_at(pool: &PgPool, batch: &Batch) -> DateTime<Utc> {
    let mut conn = pool.get().expect("connection");
    batches::table.find(batch.id)
                  .select(batches::updated_at)
                  .first(&mut conn)
                  .expect("updated_at")
}

#[test]
fn insert_and_load_roundtrip() {
    let Some(()) = with_pool(|pool| {
        let store = PgBatchStore::new(provider(pool));
        let batch = seeded_batch(pool);
        store.insert(&batch).expect("insert");

        let by_id = store.load(batch.id).unwrap();
        assert_eq!(by_id, batch);
        let by_number = store.load_by_number(&batch.batch_number).unwrap();
        assert_eq!(by_number.id, batch.id);
        assert_eq!(by_number.events.len(), 1);
        assert_eq!(by_number.events[0].event_type(), "batch_created");

        assert_eq!(store.insert(&batch), Err(StoreError::Duplicate(batch.batch_number.clone())));
        assert_eq!(store.load_by_number("no-such-batch").unwrap_err(), StoreError::NotFound);
    }) else {
        eprintln!("skip insert_and_load_roundtrip (no DATABASE_URL)");
        return;
    };
}

#[test]
fn commit_appends_events_and_bumps_version() {
    let Some(()) = with_pool(|pool| {
        let store = PgBatchStore::new(provider(pool));
        let mut batch = seeded_batch(pool);
        store.insert(&batch).unwrap();

        assert_eq!(stored_updated_at(pool, &batch), t0());

        batch.status = BatchStatus::InProgress;
        let held_at = t0() + Duration::hours(2);
        place_hold(&mut batch, Some("scale calibration".into()), &operator(), held_at).unwrap();
        let new_events = batch.events[1..].to_vec();
        let version = store.commit(&batch, 0, &new_events).expect("commit");
        assert_eq!(version, 1);
        assert_eq!(stored_updated_at(pool, &batch), held_at);

        let loaded = store.load(batch.id).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.status, BatchStatus::OnHold);
        let seqs: Vec<u64> = store.list_events(batch.id).unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }) else {
        eprintln!("skip commit_appends_events_and_bumps_version (no DATABASE_URL)");
        return;
    };
}

#[test]
fn stale_commit_is_rejected_without_writing() {
    let Some(()) = with_pool(|pool| {
        let store = PgBatchStore::new(provider(pool));
        let mut batch = seeded_batch(pool);
        store.insert(&batch).unwrap();
        batch.status = BatchStatus::InProgress;
        store.commit(&batch, 0, &[]).unwrap();

        place_hold(&mut batch, None, &operator(), t0()).unwrap();
        let new_events = batch.events[1..].to_vec();
        let err = store.commit(&batch, 0, &new_events).unwrap_err();
        assert_eq!(err, StoreError::VersionConflict { expected: 0, found: 1 });
        assert_eq!(store.list_events(batch.id).unwrap().len(), 1);
        assert_eq!(store.load(batch.id).unwrap().status, BatchStatus::InProgress);

        let mut ghost = batch.clone();
        ghost.id = uuid::Uuid::new_v4();
        assert_eq!(store.commit(&ghost, 0, &[]).unwrap_err(), StoreError::NotFound);
    }) else {
        eprintln!("skip stale_commit_is_rejected_without_writing (no DATABASE_URL)");
        return;
    };
}

#[test]
fn count_for_flow_filters_by_status() {
    let Some(()) = with_pool(|pool| {
        let store = PgBatchStore::new(provider(pool));
        let batch = seeded_batch(pool);
        store.insert(&batch).unwrap();
        let key = batch.flow_key();
        assert_eq!(store.count_for_flow(key, ACTIVE_STATUSES).unwrap(), 1);
        assert_eq!(store.count_for_flow(key, &[BatchStatus::Completed]).unwrap(), 0);
        assert_eq!(store.count_for_flow(key, ALL_STATUSES).unwrap(), 1);
    }) else {
        eprintln!("skip count_for_flow_filters_by_status (no DATABASE_URL)");
        return;
    };
}

#[test]
fn insert_requires_pinned_flow_to_be_active() {
    let Some(()) = with_pool(|pool| {
        let store = PgBatchStore::new(provider(pool));
        let flows = PgFlowStore::new(provider(pool));
        let batch = seeded_batch(pool);
        flows.deactivate(batch.flow_key()).unwrap();

        assert_eq!(store.insert(&batch), Err(StoreError::StatusChanged(FlowStatus::Archived)));
        assert_eq!(store.load(batch.id).unwrap_err(), StoreError::NotFound);
    }) else {
        eprintln!("skip insert_requires_pinned_flow_to_be_active (no DATABASE_URL)");
        return;
    };
}

#[test]
fn deactivate_is_refused_while_batches_are_live() {
    let Some(()) = with_pool(|pool| {
        let store = PgBatchStore::new(provider(pool));
        let flows = PgFlowStore::new(provider(pool));
        let batch = seeded_batch(pool);
        store.insert(&batch).unwrap();

        assert_eq!(flows.deactivate(batch.flow_key()), Err(StoreError::InUse(1)));
        assert_eq!(flows.load(batch.flow_key()).unwrap().status, FlowStatus::Active);
    }) else {
        eprintln!("skip deactivate_is_refused_while_batches_are_live (no DATABASE_URL)");
        return;
    };
}
