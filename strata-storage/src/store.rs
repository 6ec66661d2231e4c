//! RDBMS-backed record store.

use crate::iterator::RecordIterator;
use crate::record_store::RecordStore;
use crate::registry::DataSourceRegistry;
use crate::sql::{DriverError, SqlPool};
use crate::{lifecycle, reader, writer};
use ::async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{
    ConfigError, JsonRecordCodec, QueryTemplateSet, RangeScan, Record, RecordCodec, RecordGroup,
    StoreConfig, StrataResult, TenantId, TimestampMs, PROP_DATASOURCE,
};

/// Everything a store operation needs, shared with live iterators.
pub(crate) struct StoreContext<P: SqlPool> {
    pub(crate) pool: Arc<P>,
    pub(crate) templates: QueryTemplateSet,
    pub(crate) codec: Arc<dyn RecordCodec>,
    pub(crate) partition_count: u32,
}

impl<P: SqlPool> StoreContext<P> {
    pub(crate) async fn acquire(&self) -> StrataResult<P::Connection> {
        self.pool
            .acquire()
            .await
            .map_err(DriverError::into_unavailable)
    }
}

/// Record store over any [`SqlPool`].
pub struct RdbmsRecordStore<P: SqlPool> {
    ctx: Arc<StoreContext<P>>,
    config: StoreConfig,
}

impl<P: SqlPool> Clone for RdbmsRecordStore<P> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            config: self.config.clone(),
        }
    }
}

impl<P: SqlPool> RdbmsRecordStore<P> {
    /// Initialize from a property map, resolving the pool and template set
    /// through `registry`.
    ///
    /// Properties: `datasource` (required), `category`, `partitionCount`.
    pub fn init(
        properties: &HashMap<String, String>,
        registry: &DataSourceRegistry<P>,
    ) -> StrataResult<Self> {
        Self::init_with_codec(properties, registry, Arc::new(JsonRecordCodec))
    }

    pub fn init_with_codec(
        properties: &HashMap<String, String>,
        registry: &DataSourceRegistry<P>,
        codec: Arc<dyn RecordCodec>,
    ) -> StrataResult<Self> {
        let config = StoreConfig::from_properties(properties)?;
        Self::from_config(config, registry, codec)
    }

    pub fn from_config(
        config: StoreConfig,
        registry: &DataSourceRegistry<P>,
        codec: Arc<dyn RecordCodec>,
    ) -> StrataResult<Self> {
        config.validate()?;
        let pool = registry
            .get(&config.datasource)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: PROP_DATASOURCE.to_string(),
                value: config.datasource.clone(),
                reason: "no data source registered under this name".to_string(),
            })?;

        let templates = match &config.category {
            Some(category) => registry.catalog().get(category)?,
            None => registry.catalog().for_product(pool.product_name())?,
        }
        .clone();

        let store = Self::build(pool, templates, codec, config)?;
        tracing::info!(
            datasource = %store.config.datasource,
            dialect = %store.ctx.templates.name,
            partition_count = store.ctx.partition_count,
            "Record store initialized"
        );
        Ok(store)
    }

    /// Build directly from a pool and template set.
    pub fn new(
        pool: Arc<P>,
        templates: QueryTemplateSet,
        codec: Arc<dyn RecordCodec>,
        partition_count: u32,
    ) -> StrataResult<Self> {
        let config = StoreConfig::new("direct")
            .with_category(templates.name.clone())
            .with_partition_count(partition_count);
        config.validate()?;
        Self::build(pool, templates, codec, config)
    }

    fn build(
        pool: Arc<P>,
        templates: QueryTemplateSet,
        codec: Arc<dyn RecordCodec>,
        config: StoreConfig,
    ) -> StrataResult<Self> {
        templates.validate()?;
        let ctx = StoreContext {
            pool,
            templates,
            codec,
            partition_count: config.partition_count,
        };
        Ok(Self {
            ctx: Arc::new(ctx),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.ctx.pool
    }
}

#[async_trait]
impl<P: SqlPool> RecordStore for RdbmsRecordStore<P> {
    type Records = RecordIterator<P>;

    async fn put(&self, records: &[Record]) -> StrataResult<()> {
        writer::put(&self.ctx, records).await
    }

    async fn delete_range(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        time_from: TimestampMs,
        time_to: TimestampMs,
    ) -> StrataResult<()> {
        writer::delete_range(&self.ctx, tenant_id, table_name, time_from, time_to).await
    }

    async fn delete_ids(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        ids: &[String],
    ) -> StrataResult<()> {
        writer::delete_ids(&self.ctx, tenant_id, table_name, ids).await
    }

    async fn get_by_ids(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        _parallelism_hint: u32,
        columns: Option<&[String]>,
        ids: &[String],
    ) -> StrataResult<Vec<RecordGroup>> {
        reader::plan_ids(&self.ctx, tenant_id, table_name, columns, ids).await
    }

    async fn get_range(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        parallelism_hint: u32,
        columns: Option<&[String]>,
        scan: RangeScan,
    ) -> StrataResult<Vec<RecordGroup>> {
        reader::plan_range(&self.ctx, tenant_id, table_name, parallelism_hint, columns, scan).await
    }

    async fn read_records(&self, group: &RecordGroup) -> StrataResult<RecordIterator<P>> {
        reader::read_records(&self.ctx, group).await
    }

    async fn create_table(&self, tenant_id: TenantId, table_name: &str) -> StrataResult<()> {
        lifecycle::create_table(&self.ctx, tenant_id, table_name).await
    }

    async fn delete_table(&self, tenant_id: TenantId, table_name: &str) -> StrataResult<()> {
        lifecycle::delete_table(&self.ctx, tenant_id, table_name).await
    }

    async fn table_exists(&self, tenant_id: TenantId, table_name: &str) -> StrataResult<bool> {
        lifecycle::table_exists(&self.ctx, tenant_id, table_name).await
    }

    async fn get_record_count(
        &self,
        tenant_id: TenantId,
        table_name: &str,
        time_from: TimestampMs,
        time_to: TimestampMs,
    ) -> StrataResult<i64> {
        lifecycle::record_count(&self.ctx, tenant_id, table_name, time_from, time_to).await
    }

    fn is_pagination_supported(&self) -> bool {
        self.ctx.templates.pagination_supported
    }

    fn is_record_count_supported(&self) -> bool {
        self.ctx.templates.record_count_supported
    }

    fn partition_count(&self) -> u32 {
        self.ctx.partition_count
    }

    fn query_templates(&self) -> &QueryTemplateSet {
        &self.ctx.templates
    }

    async fn destroy(&self) -> StrataResult<()> {
        Ok(())
    }
}
