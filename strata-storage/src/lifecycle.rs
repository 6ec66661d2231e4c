//! Table lifecycle: create, delete, existence and record counts.

use crate::sql::{DriverError, SqlConnection, SqlParam, SqlPool};
use crate::store::StoreContext;
use strata_core::{
    QueryKind, StorageError, StrataError, StrataResult, TenantId, TimestampMs,
};

/// Record count reported when the dialect cannot count.
pub const RECORD_COUNT_UNSUPPORTED: i64 = -1;

/// Run the existence check on an already acquired connection.
///
/// Any failure of the check statement, including a missing template, counts
/// as "does not exist".
pub(crate) async fn table_exists_on<P: SqlPool>(
    conn: &mut P::Connection,
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
) -> bool {
    let sql = match ctx.templates.resolve(QueryKind::TableCheck, tenant_id, table_name) {
        Ok(sql) => sql,
        Err(e) => {
            tracing::debug!(error = %e, "No table check query; reporting table as absent");
            return false;
        }
    };
    match conn.query_rows(&sql, &[]).await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(
                tenant_id,
                table = table_name,
                error = %e,
                "Table check failed"
            );
            false
        }
    }
}

/// Classify a failed statement: a missing table wins over the driver error.
pub(crate) async fn classify_failure<P: SqlPool>(
    conn: &mut P::Connection,
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    operation: &str,
    err: DriverError,
) -> StrataError {
    if table_exists_on(conn, ctx, tenant_id, table_name).await {
        err.into_storage(operation)
    } else {
        StrataError::table_not_available(tenant_id, table_name)
    }
}

/// Roll back, logging instead of failing.
pub(crate) async fn rollback_quietly<C: SqlConnection>(conn: &mut C, operation: &str) {
    if let Err(e) = conn.rollback().await {
        tracing::warn!(operation, error = %e, "Rollback failed");
    }
}

pub(crate) async fn table_exists<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
) -> StrataResult<bool> {
    let mut conn = ctx.acquire().await?;
    Ok(table_exists_on(&mut conn, ctx, tenant_id, table_name).await)
}

pub(crate) async fn create_table<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
) -> StrataResult<()> {
    let mut conn = ctx.acquire().await?;
    for sql in ctx.templates.init_queries(tenant_id, table_name) {
        if let Err(e) = conn.execute(&sql, &[]).await {
            if table_exists_on(&mut conn, ctx, tenant_id, table_name).await {
                tracing::debug!(tenant_id, table = table_name, "Table already exists");
                return Ok(());
            }
            return Err(e.into_storage("creating table"));
        }
    }
    tracing::info!(tenant_id, table = table_name, "Created record table");
    Ok(())
}

pub(crate) async fn delete_table<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
) -> StrataResult<()> {
    let mut conn = ctx.acquire().await?;
    for sql in ctx.templates.delete_queries(tenant_id, table_name) {
        if let Err(e) = conn.execute(&sql, &[]).await {
            if !table_exists_on(&mut conn, ctx, tenant_id, table_name).await {
                tracing::debug!(tenant_id, table = table_name, "Table already absent");
                return Ok(());
            }
            return Err(e.into_storage("deleting table"));
        }
    }
    tracing::info!(tenant_id, table = table_name, "Deleted record table");
    Ok(())
}

pub(crate) async fn record_count<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    time_from: TimestampMs,
    time_to: TimestampMs,
) -> StrataResult<i64> {
    if !ctx.templates.record_count_supported {
        return Ok(RECORD_COUNT_UNSUPPORTED);
    }
    let sql = ctx.templates.resolve(QueryKind::Count, tenant_id, table_name)?;
    let mut conn = ctx.acquire().await?;
    let params = [SqlParam::Int(time_from), SqlParam::Int(time_to)];
    let rows = match conn.query_rows(&sql, &params).await {
        Ok(rows) => rows,
        Err(e) => {
            return Err(
                classify_failure(&mut conn, ctx, tenant_id, table_name, "counting records", e)
                    .await,
            )
        }
    };
    match rows.first() {
        Some(row) => row
            .get_i64(0)
            .map_err(|e| e.into_storage("counting records")),
        None => Err(StorageError::RecordCountUnavailable {
            table: format!("[{}:{}]", tenant_id, table_name),
        }
        .into()),
    }
}
