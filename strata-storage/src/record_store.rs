//! Record store trait.
//!
//! The dialect-independent contract callers program against. Planning calls
//! (`get_by_ids`, `get_range`) return record groups; a group is later turned
//! into records with `read_records`, possibly by a different process.

use ::async_trait::async_trait;
use strata_core::{
    QueryTemplateSet, Record, RangeScan, RecordGroup, StrataResult, TenantId, TimestampMs,
};

/// Tenant-scoped record storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Iterator type returned by [`RecordStore::read_records`].
    type Records: Send + 'static;

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert or replace records. An empty slice is a no-op.
    async fn put(&self, records: &[Record]) -> StrataResult<()>;

    /// Delete records with `time_from <= timestamp < time_to`.
    async fn delete_range(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        time_from: TimestampMs,
        time_to: TimestampMs,
    ) -> StrataResult<()>;

    /// Delete records by id.
    async fn delete_ids(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        ids: &[String],
    ) -> StrataResult<()>;

    // ========================================================================
    // READS
    // ========================================================================

    /// Plan a lookup by id as a single id group. Fails with
    /// `TableNotAvailable` when the table is missing. An empty id list still
    /// yields one group, whose iterator is empty.
    async fn get_by_ids(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        parallelism_hint: u32,
        columns: Option<&[String]>,
        ids: &[String],
    ) -> StrataResult<Vec<RecordGroup>>;

    /// Plan a ranged scan, one group per partition range. A paged scan is
    /// planned as a single group.
    ///
    /// # Errors
    ///
    /// - `TableNotAvailable` when the table is missing.
    /// - `ValidationError` when `scan` carries a paging window and the
    ///   dialect has no pagination support.
    async fn get_range(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        parallelism_hint: u32,
        columns: Option<&[String]>,
        scan: RangeScan,
    ) -> StrataResult<Vec<RecordGroup>>;

    /// Resolve a group into a live record iterator.
    async fn read_records(&self, group: &RecordGroup) -> StrataResult<Self::Records>;

    // ========================================================================
    // TABLES
    // ========================================================================

    async fn create_table(&self, tenant_id: TenantId, table_name: &str) -> StrataResult<()>;

    async fn delete_table(&self, tenant_id: TenantId, table_name: &str) -> StrataResult<()>;

    async fn table_exists(&self, tenant_id: TenantId, table_name: &str) -> StrataResult<bool>;

    /// Records with `time_from <= timestamp < time_to`, or `-1` when the
    /// dialect cannot count.
    async fn get_record_count(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        time_from: TimestampMs,
        time_to: TimestampMs,
    ) -> StrataResult<i64>;

    // ========================================================================
    // CAPABILITIES
    // ========================================================================

    fn is_pagination_supported(&self) -> bool;

    fn is_record_count_supported(&self) -> bool;

    fn partition_count(&self) -> u32;

    fn query_templates(&self) -> &QueryTemplateSet;

    /// Release store-level resources. Pools are owned by the registry.
    async fn destroy(&self) -> StrataResult<()>;
}
