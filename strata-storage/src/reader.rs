//! Scan reader.
//!
//! Plans record groups for ranged scans and id lookups, and resolves a record
//! group into a live [`RecordIterator`].

use crate::iterator::RecordIterator;
use crate::lifecycle::{classify_failure, table_exists};
use crate::sql::{FetchOptions, SqlConnection, SqlParam, SqlPool};
use crate::store::StoreContext;
use std::collections::VecDeque;
use std::sync::Arc;
use strata_core::{
    column_filter, plan_scan, IdsRecordGroup, QueryKind, RangeRecordGroup, RangeScan, RecordGroup,
    StrataError, StrataResult, TenantId, ValidationError,
};

const OPERATION: &str = "reading records";

/// Cursor type of a pool's connections.
pub type Cursor<P> = <<P as SqlPool>::Connection as SqlConnection>::Cursor;

// ============================================================================
// PLANNING
// ============================================================================

async fn ensure_table<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
) -> StrataResult<()> {
    if table_exists(ctx, tenant_id, table_name).await? {
        Ok(())
    } else {
        Err(StrataError::table_not_available(tenant_id, table_name))
    }
}

fn owned_columns(columns: Option<&[String]>) -> Option<Vec<String>> {
    columns.filter(|c| !c.is_empty()).map(<[String]>::to_vec)
}

pub(crate) async fn plan_ids<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    columns: Option<&[String]>,
    ids: &[String],
) -> StrataResult<Vec<RecordGroup>> {
    ensure_table(ctx, tenant_id, table_name).await?;
    let group =
        IdsRecordGroup::planned(tenant_id, table_name, owned_columns(columns), ids.to_vec());
    Ok(vec![group.into()])
}

pub(crate) async fn plan_range<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    parallelism_hint: u32,
    columns: Option<&[String]>,
    scan: RangeScan,
) -> StrataResult<Vec<RecordGroup>> {
    ensure_table(ctx, tenant_id, table_name).await?;
    if scan.paging.is_paged() && !ctx.templates.pagination_supported {
        return Err(ValidationError::InvalidValue {
            field: "paging".to_string(),
            reason: format!("dialect {} does not support pagination", ctx.templates.name),
        }
        .into());
    }

    let shards = plan_scan(ctx.partition_count, parallelism_hint, &scan.paging);
    tracing::debug!(
        tenant_id,
        table = table_name,
        parallelism_hint,
        groups = shards.len(),
        "Planned range scan"
    );
    shards
        .into_iter()
        .map(|range| {
            RangeRecordGroup::new(tenant_id, table_name, owned_columns(columns), scan, range)
                .map(RecordGroup::from)
        })
        .collect()
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Open a query on a fresh connection; classify failures against the table.
async fn open_query<P: SqlPool>(
    ctx: &StoreContext<P>,
    tenant_id: TenantId,
    table_name: &str,
    sql: &str,
    params: &[SqlParam],
    options: FetchOptions,
) -> StrataResult<Cursor<P>> {
    let conn = ctx.acquire().await?;
    match conn.open_cursor(sql, params, options).await {
        Ok(cursor) => Ok(cursor),
        Err(e) => {
            let mut check_conn = ctx.acquire().await?;
            Err(classify_failure(&mut check_conn, ctx, tenant_id, table_name, OPERATION, e).await)
        }
    }
}

/// Remaining id sub-lists of a chained id read.
pub(crate) struct IdBatches<P: SqlPool> {
    ctx: Arc<StoreContext<P>>,
    tenant_id: TenantId,
    table_name: String,
    pending: VecDeque<Vec<String>>,
}

impl<P: SqlPool> IdBatches<P> {
    fn new(
        ctx: Arc<StoreContext<P>>,
        tenant_id: TenantId,
        table_name: &str,
        ids: &[String],
    ) -> Self {
        let batch_size = ctx.templates.record_batch_size.max(1);
        let pending = ids.chunks(batch_size).map(<[String]>::to_vec).collect();
        Self {
            ctx,
            tenant_id,
            table_name: table_name.to_string(),
            pending,
        }
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Query the next sub-list, or `None` when all have been read.
    pub(crate) async fn open_next(&mut self) -> StrataResult<Option<Cursor<P>>> {
        let Some(batch) = self.pending.pop_front() else {
            return Ok(None);
        };
        let sql = self.ctx.templates.resolve_with_id_count(
            QueryKind::RetrievalByIds,
            self.tenant_id,
            &self.table_name,
            batch.len(),
        )?;
        let params: Vec<SqlParam> = batch.into_iter().map(SqlParam::Text).collect();
        let cursor = open_query(
            &*self.ctx,
            self.tenant_id,
            &self.table_name,
            &sql,
            &params,
            FetchOptions::buffered(),
        )
        .await?;
        Ok(Some(cursor))
    }
}

pub(crate) async fn read_records<P: SqlPool>(
    ctx: &Arc<StoreContext<P>>,
    group: &RecordGroup,
) -> StrataResult<RecordIterator<P>> {
    match group {
        RecordGroup::Ids(group) => read_ids(ctx, group).await,
        RecordGroup::Range(group) => read_range(ctx, group).await,
    }
}

async fn read_ids<P: SqlPool>(
    ctx: &Arc<StoreContext<P>>,
    group: &IdsRecordGroup,
) -> StrataResult<RecordIterator<P>> {
    let (tenant_id, table_name) = (group.tenant_id(), group.table_name());
    if group.ids().is_empty() {
        return Ok(RecordIterator::empty(tenant_id, table_name, Arc::clone(&ctx.codec)));
    }

    let mut batches = IdBatches::new(Arc::clone(ctx), tenant_id, table_name, group.ids());
    tracing::debug!(
        tenant_id,
        table = table_name,
        ids = group.ids().len(),
        sub_batches = batches.pending.len(),
        "Reading records by id"
    );
    let first = batches.open_next().await?;
    let rest = if batches.is_empty() { None } else { Some(batches) };

    Ok(RecordIterator::new(
        tenant_id,
        table_name,
        column_filter(group.columns()),
        Arc::clone(&ctx.codec),
        first,
        rest,
    ))
}

async fn read_range<P: SqlPool>(
    ctx: &Arc<StoreContext<P>>,
    group: &RangeRecordGroup,
) -> StrataResult<RecordIterator<P>> {
    let shards = group.shards();
    if shards.start >= shards.end || shards.end > ctx.partition_count {
        return Err(ValidationError::InvalidValue {
            field: "shards".to_string(),
            reason: format!(
                "shard range [{}, {}) outside [0, {})",
                shards.start, shards.end, ctx.partition_count
            ),
        }
        .into());
    }

    let templates = &ctx.templates;
    let sql =
        templates.resolve(QueryKind::RetrievalByRange, group.tenant_id(), group.table_name())?;
    let (first, second) = group.paging().parameters(templates.pagination_mode);
    let params = [
        SqlParam::from(shards.start),
        SqlParam::from(shards.end),
        SqlParam::Int(group.time_from()),
        SqlParam::Int(group.time_to()),
        SqlParam::Int(first),
        SqlParam::Int(second),
    ];
    let options = if templates.forward_only_read_enabled {
        FetchOptions::streaming(templates.fetch_size)
    } else {
        FetchOptions::buffered()
    };

    let cursor = open_query(
        &**ctx,
        group.tenant_id(),
        group.table_name(),
        &sql,
        &params,
        options,
    )
    .await?;

    Ok(RecordIterator::new(
        group.tenant_id(),
        group.table_name(),
        column_filter(group.columns()),
        Arc::clone(&ctx.codec),
        Some(cursor),
        None,
    ))
}
