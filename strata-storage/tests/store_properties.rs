//! Property-based tests for the record store over SQLite
//!
//! For any batch of records with distinct ids:
//! - writing the batch and then a rewrite of part of it, then reading the
//!   batch back by id, returns the latest value of every record
//! - the merge and insert/update write strategies leave the same final state
//! - a paged scan returns the matching slice of the `(timestamp, id)` order

use proptest::prelude::*;
use strata_test_utils::assertions::*;
use strata_test_utils::fixtures::*;
use strata_test_utils::generators::*;
use strata_test_utils::*;

const TENANT: TenantId = 11;

// ============================================================================
// HELPERS
// ============================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime")
}

/// Rewrite every other record with fresh values and a later timestamp.
fn rewrite_half(records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .step_by(2)
        .enumerate()
        .map(|(i, r)| {
            Record::new(
                r.id(),
                r.tenant_id(),
                r.table_name(),
                sample_values(i as i64),
                r.timestamp() + 1,
            )
        })
        .collect()
}

/// Latest version of each record after applying `rewrites` over `records`.
fn latest(records: &[Record], rewrites: &[Record]) -> Vec<Record> {
    records
        .iter()
        .map(|r| {
            rewrites
                .iter()
                .find(|w| w.id() == r.id())
                .unwrap_or(r)
                .clone()
        })
        .collect()
}

async fn write_then_rewrite(
    fixture: &TempStore,
    table: &str,
    records: &[Record],
    rewrites: &[Record],
) -> StrataResult<()> {
    fixture.store.create_table(TENANT, table).await?;
    fixture.store.put(records).await?;
    fixture.store.put(rewrites).await
}

async fn read_by_ids(
    fixture: &TempStore,
    table: &str,
    ids: &[String],
) -> StrataResult<Vec<Record>> {
    let mut all = Vec::new();
    for group in fixture.store.get_by_ids(TENANT, table, 1, None, ids).await? {
        all.extend(fixture.store.read_records(&group).await?.collect_records().await?);
    }
    Ok(all)
}

async fn read_scan(
    fixture: &TempStore,
    table: &str,
    scan: RangeScan,
) -> StrataResult<Vec<Record>> {
    let mut all = Vec::new();
    for group in fixture.store.get_range(TENANT, table, 4, None, scan).await? {
        all.extend(fixture.store.read_records(&group).await?.collect_records().await?);
    }
    Ok(all)
}

fn scan_sorted(records: &[Record]) -> Vec<Record> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| (a.timestamp(), a.id()).cmp(&(b.timestamp(), b.id())));
    sorted
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_put_then_get_returns_latest_values(
        table in arb_table_name(),
        records in arb_records(TENANT, "placeholder", 12)
            .prop_filter("non-empty batch", |r| !r.is_empty()),
    ) {
        let records: Vec<Record> = records
            .into_iter()
            .map(|r| {
                Record::new(r.id(), TENANT, table.clone(), r.values().clone(), r.timestamp())
            })
            .collect();
        let rewrites = rewrite_half(&records);
        let expected = latest(&records, &rewrites);

        let rt = runtime();
        rt.block_on(async {
            for templates in [dialect::sqlite(), insert_update_templates()] {
                let fixture = temp_store_with(templates, TEST_PARTITION_COUNT);
                write_then_rewrite(&fixture, &table, &records, &rewrites).await?;

                let read = read_by_ids(&fixture, &table, &ids_of(&records)).await?;
                assert_same_records(&read, &expected);
                assert_no_leaks(fixture.pool());
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_write_strategies_agree(
        records in arb_records(TENANT, "events", 12),
    ) {
        let rewrites = rewrite_half(&records);

        let rt = runtime();
        rt.block_on(async {
            let merge = temp_store_with(dialect::sqlite(), TEST_PARTITION_COUNT);
            let fallback = temp_store_with(insert_update_templates(), TEST_PARTITION_COUNT);
            write_then_rewrite(&merge, "events", &records, &rewrites).await?;
            write_then_rewrite(&fallback, "events", &records, &rewrites).await?;

            let merged = read_scan(&merge, "events", RangeScan::all()).await?;
            let reconciled = read_scan(&fallback, "events", RangeScan::all()).await?;
            prop_assert_eq!(merged.len(), records.len());
            assert_same_records(&merged, &reconciled);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_paged_scan_returns_ordered_slice(
        records in arb_records(TENANT, "events", 20),
        paging in arb_paging(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let fixture = temp_store();
            fixture.store.create_table(TENANT, "events").await?;
            fixture.store.put(&records).await?;

            let mut scan = RangeScan::all();
            scan.paging = paging;
            let read = read_scan(&fixture, "events", scan).await?;

            if paging.is_paged() {
                let sorted = scan_sorted(&records);
                let from = (paging.records_from as usize).min(sorted.len());
                let to = match paging.records_count {
                    Some(count) => (from + count as usize).min(sorted.len()),
                    None => sorted.len(),
                };
                prop_assert_eq!(read, sorted[from..to].to_vec());
            } else {
                assert_same_records(&read, &records);
            }
            assert_no_leaks(fixture.pool());
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_plan_scan_covers_partitions(
        paging in arb_paging(),
        hint in 1u32..32,
        partition_count in 1u32..200,
    ) {
        let shards = plan_scan(partition_count, hint, &paging);
        if paging.is_paged() {
            prop_assert_eq!(shards, vec![ShardRange::new(0, partition_count)]);
        } else {
            prop_assert!(!shards.is_empty());
            prop_assert!(shards.len() as u32 <= hint.min(partition_count));
            prop_assert_eq!(shards[0].start, 0);
            prop_assert_eq!(shards[shards.len() - 1].end, partition_count);
            for pair in shards.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }
}
