//! Batch writer.
//!
//! `put` groups records by tenant and table, in first-appearance order, and
//! writes each group inside its own transaction on one shared connection.
//! The write strategy is picked once from the dialect: a single batched
//! upsert when a merge template exists, otherwise a batched insert that falls
//! back to per-record insert-or-update when it conflicts.

use crate::lifecycle::{classify_failure, rollback_quietly, table_exists_on};
use crate::sql::{DriverError, SqlConnection, SqlParam, SqlPool};
use crate::store::StoreContext;
use std::collections::HashMap;
use strata_core::{
    partition_key, QueryKind, QueryTemplateSet, Record, StrataError, StrataResult, TenantId,
    TimestampMs,
};

const OPERATION: &str = "adding records";

/// How a batch of records reaches the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// One batched upsert statement.
    Merge,
    /// Batched insert; on conflict, per-record insert then update.
    InsertOrUpdate,
}

impl WriteStrategy {
    pub fn for_templates(templates: &QueryTemplateSet) -> Self {
        if templates.has_merge() {
            WriteStrategy::Merge
        } else {
            WriteStrategy::InsertOrUpdate
        }
    }
}

/// Records sharing tenant and table.
struct WriteGroup<'a> {
    tenant_id: TenantId,
    table_name: &'a str,
    records: Vec<&'a Record>,
}

/// Group records by `(tenant, table)` keeping first-appearance order.
/// Table names compare case-insensitively.
fn group_records(records: &[Record]) -> Vec<WriteGroup<'_>> {
    let mut index: HashMap<(TenantId, String), usize> = HashMap::new();
    let mut groups: Vec<WriteGroup<'_>> = Vec::new();
    for record in records {
        let key = (record.tenant_id(), record.table_name().to_lowercase());
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(WriteGroup {
                tenant_id: record.tenant_id(),
                table_name: record.table_name(),
                records: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].records.push(record);
    }
    groups
}

/// Bind rows in `(partition_key, timestamp, data, record_id)` order.
fn bind_rows<P: SqlPool>(
    ctx: &StoreContext<P>,
    records: &[&Record],
) -> StrataResult<Vec<Vec<SqlParam>>> {
    let with_length = ctx.templates.blob_length_required;
    records
        .iter()
        .map(|record| -> StrataResult<Vec<SqlParam>> {
            let data = ctx.codec.encode(record.values())?;
            Ok(vec![
                SqlParam::from(partition_key(record.id(), ctx.partition_count)),
                SqlParam::Int(record.timestamp()),
                SqlParam::blob(data, with_length),
                SqlParam::from(record.id()),
            ])
        })
        .collect()
}

pub(crate) async fn put<P: SqlPool>(ctx: &StoreContext<P>, records: &[Record]) -> StrataResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    let strategy = WriteStrategy::for_templates(&ctx.templates);
    let groups = group_records(records);
    tracing::debug!(
        records = records.len(),
        groups = groups.len(),
        ?strategy,
        "Writing records"
    );

    let mut conn = ctx.acquire().await?;
    for group in &groups {
        let rows = bind_rows(ctx, &group.records)?;
        match strategy {
            WriteStrategy::Merge => {
                write_merge(&mut conn, ctx, group.tenant_id, group.table_name, &rows).await?
            }
            WriteStrategy::InsertOrUpdate => {
                write_insert_or_update(&mut conn, ctx, group.tenant_id, group.table_name, &rows)
                    .await?
            }
        }
    }
    Ok(())
}

async fn write_merge<P: SqlPool>(
    conn: &mut P::Connection,
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    rows: &[Vec<SqlParam>],
) -> StrataResult<()> {
    let sql = ctx.templates.resolve(QueryKind::Merge, tenant_id, table_name)?;
    conn.begin().await.map_err(|e| e.into_storage(OPERATION))?;
    let result = execute_and_commit(conn, &sql, rows).await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            rollback_quietly(conn, OPERATION).await;
            Err(classify_failure(conn, ctx, tenant_id, table_name, OPERATION, e).await)
        }
    }
}

async fn write_insert_or_update<P: SqlPool>(
    conn: &mut P::Connection,
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    rows: &[Vec<SqlParam>],
) -> StrataResult<()> {
    let insert = ctx.templates.resolve(QueryKind::Insert, tenant_id, table_name)?;
    let update = ctx.templates.resolve(QueryKind::Update, tenant_id, table_name)?;

    conn.begin().await.map_err(|e| e.into_storage(OPERATION))?;
    let result = execute_and_commit(conn, &insert, rows).await;

    let batch_error = match result {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    rollback_quietly(conn, OPERATION).await;
    if !table_exists_on(conn, ctx, tenant_id, table_name).await {
        return Err(StrataError::table_not_available(tenant_id, table_name));
    }

    tracing::warn!(
        tenant_id,
        table = table_name,
        records = rows.len(),
        error = %batch_error,
        "Batch insert failed, reconciling records one by one"
    );
    for row in rows.chunks(1) {
        insert_or_update_one(conn, &insert, &update, row).await?;
    }
    Ok(())
}

async fn execute_and_commit<C: SqlConnection>(
    conn: &mut C,
    sql: &str,
    rows: &[Vec<SqlParam>],
) -> Result<(), DriverError> {
    conn.execute_batch(sql, rows).await?;
    conn.commit().await
}

async fn insert_or_update_one<C: SqlConnection>(
    conn: &mut C,
    insert: &str,
    update: &str,
    row: &[Vec<SqlParam>],
) -> StrataResult<()> {
    conn.begin().await.map_err(|e| e.into_storage(OPERATION))?;
    let inserted = execute_and_commit(conn, insert, row).await;
    if inserted.is_ok() {
        return Ok(());
    }
    rollback_quietly(conn, OPERATION).await;

    conn.begin().await.map_err(|e| e.into_storage(OPERATION))?;
    let updated = execute_and_commit(conn, update, row).await;
    match updated {
        Ok(()) => Ok(()),
        Err(e) => {
            rollback_quietly(conn, OPERATION).await;
            Err(e.into_storage(OPERATION))
        }
    }
}

// ============================================================================
// DELETION
// ============================================================================

pub(crate) async fn delete_range<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    time_from: TimestampMs,
    time_to: TimestampMs,
) -> StrataResult<()> {
    let sql = ctx.templates.resolve(QueryKind::DeletionByRange, tenant_id, table_name)?;
    let rows = vec![vec![SqlParam::Int(time_from), SqlParam::Int(time_to)]];
    let mut conn = ctx.acquire().await?;
    run_deletion(&mut conn, ctx, tenant_id, table_name, &[(sql, rows)]).await
}

/// Delete ids in sub-batches of the dialect's batch size, in one transaction.
pub(crate) async fn delete_ids<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    ids: &[String],
) -> StrataResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let batch_size = ctx.templates.record_batch_size.max(1);
    let mut statements = Vec::new();
    for chunk in ids.chunks(batch_size) {
        let sql = ctx.templates.resolve_with_id_count(
            QueryKind::DeletionByIds,
            tenant_id,
            table_name,
            chunk.len(),
        )?;
        let params: Vec<SqlParam> = chunk.iter().map(|id| SqlParam::from(id.as_str())).collect();
        statements.push((sql, vec![params]));
    }
    tracing::debug!(
        tenant_id,
        table = table_name,
        ids = ids.len(),
        sub_batches = statements.len(),
        "Deleting records by id"
    );
    let mut conn = ctx.acquire().await?;
    run_deletion(&mut conn, ctx, tenant_id, table_name, &statements).await
}

async fn run_deletion<P: SqlPool>(
    conn: &mut P::Connection,
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    statements: &[(String, Vec<Vec<SqlParam>>)],
) -> StrataResult<()> {
    const DELETING: &str = "deleting records";
    conn.begin().await.map_err(|e| e.into_storage(DELETING))?;
    for (sql, rows) in statements {
        if let Err(e) = conn.execute_batch(sql, rows).await {
            rollback_quietly(conn, DELETING).await;
            return Err(classify_failure(conn, ctx, tenant_id, table_name, DELETING, e).await);
        }
    }
    if let Err(e) = conn.commit().await {
        rollback_quietly(conn, DELETING).await;
        return Err(e.into_storage(DELETING));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{dialect, ValueMap};

    fn record(id: &str, tenant: TenantId, table: &str) -> Record {
        Record::new(id, tenant, table, ValueMap::new(), 1)
    }

    #[test]
    fn test_group_records_first_appearance_order() {
        let records = vec![
            record("a", 1, "events"),
            record("b", 2, "events"),
            record("c", 1, "EVENTS"),
            record("d", 1, "logs"),
            record("e", 2, "events"),
        ];
        let groups = group_records(&records);
        let shape: Vec<(TenantId, &str, Vec<&str>)> = groups
            .iter()
            .map(|g| (g.tenant_id, g.table_name, g.records.iter().map(|r| r.id()).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (1, "events", vec!["a", "c"]),
                (2, "events", vec!["b", "e"]),
                (1, "logs", vec!["d"]),
            ]
        );
    }

    #[test]
    fn test_strategy_follows_merge_template() {
        assert_eq!(
            WriteStrategy::for_templates(&dialect::postgresql()),
            WriteStrategy::Merge
        );
        assert_eq!(
            WriteStrategy::for_templates(&dialect::mssql()),
            WriteStrategy::InsertOrUpdate
        );
    }
}
