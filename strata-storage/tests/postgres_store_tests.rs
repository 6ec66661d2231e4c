//! Record store tests against a live PostgreSQL server.
//!
//! Connection settings come from the `STRATA_DB_*` environment variables.

#![cfg(feature = "db-tests")]

use std::sync::Arc;
use strata_storage::{PgConfig, PgPool};
use strata_test_utils::assertions::*;
use strata_test_utils::fixtures::{sample_records, ids_of};
use strata_test_utils::*;

type PgStore = RdbmsRecordStore<InstrumentedPool<PgPool>>;

fn test_store() -> StrataResult<PgStore> {
    init_test_tracing();
    let pool = PgConfig::from_env()
        .create_pool()
        .map_err(|e| e.into_unavailable())?;
    RdbmsRecordStore::new(
        Arc::new(InstrumentedPool::new(pool)),
        dialect::postgresql(),
        Arc::new(JsonRecordCodec),
        32,
    )
}

/// A tenant id unlikely to collide with concurrent runs.
fn scratch_tenant() -> TenantId {
    (current_time_millis() % 1_000_000) as TenantId + 1_000
}

async fn read_groups(store: &PgStore, groups: &[RecordGroup]) -> StrataResult<Vec<Record>> {
    let mut all = Vec::new();
    for group in groups {
        all.extend(store.read_records(group).await?.collect_records().await?);
    }
    Ok(all)
}

#[tokio::test]
async fn test_postgres_write_read_delete() -> StrataResult<()> {
    let store = test_store()?;
    let tenant = scratch_tenant();
    let table = "pg_roundtrip";
    store.create_table(tenant, table).await?;

    let records = sample_records(tenant, table, 50, 1_000);
    store.put(&records).await?;
    store.put(&records[..5]).await?;

    let groups = store.get_range(tenant, table, 4, None, RangeScan::all()).await?;
    assert_eq!(groups.len(), 4);
    assert_same_records(&read_groups(&store, &groups).await?, &records);

    let by_id = store.get_by_ids(tenant, table, 1, None, &ids_of(&records[..3])).await?;
    assert_same_records(&read_groups(&store, &by_id).await?, &records[..3]);

    assert_eq!(store.get_record_count(tenant, table, 1_000, 1_010).await?, 10);
    store.delete_range(tenant, table, 1_000, 1_010).await?;
    store.delete_ids(tenant, table, &ids_of(&records[10..20])).await?;
    assert_eq!(store.get_record_count(tenant, table, i64::MIN, i64::MAX).await?, 30);

    store.delete_table(tenant, table).await?;
    assert!(!store.table_exists(tenant, table).await?);
    assert_no_leaks(store.pool());
    Ok(())
}

#[tokio::test]
async fn test_postgres_streaming_paged_scan() -> StrataResult<()> {
    let mut templates = dialect::postgresql();
    templates.fetch_size = 4;
    let pool = PgConfig::from_env()
        .create_pool()
        .map_err(|e| e.into_unavailable())?;
    let store = RdbmsRecordStore::new(
        Arc::new(InstrumentedPool::new(pool)),
        templates,
        Arc::new(JsonRecordCodec),
        8,
    )?;
    let tenant = scratch_tenant() + 1;
    let table = "pg_paged";
    store.create_table(tenant, table).await?;

    let records = sample_records(tenant, table, 25, 5_000);
    store.put(&records).await?;

    let scan = RangeScan::all().with_paging(5, Some(10));
    let groups = store.get_range(tenant, table, 4, None, scan).await?;
    assert_eq!(groups.len(), 1);
    let read = read_groups(&store, &groups).await?;
    assert_eq!(read, records[5..15].to_vec());

    store.delete_table(tenant, table).await?;
    assert_no_leaks(store.pool());
    Ok(())
}

#[tokio::test]
async fn test_postgres_missing_table() -> StrataResult<()> {
    let store = test_store()?;
    let tenant = scratch_tenant() + 2;
    let result = store.put(&sample_records(tenant, "pg_missing", 1, 0)).await;
    assert_table_not_available(&result);
    assert!(!store.table_exists(tenant, "pg_missing").await?);
    assert_no_leaks(store.pool());
    Ok(())
}
