//! Query template sets.
//!
//! A template set holds the dialect-specific SQL for every record store
//! operation together with the dialect's capability flags. Templates use `?`
//! positional markers and two placeholders:
//!
//! - `{{TABLE_NAME}}` becomes the physical table name of `(tenant, table)`.
//! - `{{RECORD_IDS}}` becomes one `?` marker per id.

use crate::{ConfigError, PaginationMode, StrataResult, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Placeholder replaced by the physical table name.
pub const TABLE_NAME_PLACEHOLDER: &str = "{{TABLE_NAME}}";

/// Placeholder replaced by the dynamic id parameter list.
pub const RECORD_IDS_PLACEHOLDER: &str = "{{RECORD_IDS}}";

const PHYSICAL_TABLE_PREFIX: &str = "rec_";

/// Deterministic physical table name for a tenant's logical table.
///
/// Logical table names are case-insensitive. The name is a UUIDv5 over
/// `"{tenant}:{lowercase table}"`, so different tenants never collide.
pub fn physical_table_name(tenant_id: TenantId, table_name: &str) -> String {
    let key = format!("{}:{}", tenant_id, table_name.to_lowercase());
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes());
    format!("{}{}", PHYSICAL_TABLE_PREFIX, uuid.simple())
}

/// Build a comma separated list of `count` positional markers.
pub fn positional_markers(count: usize) -> String {
    let mut markers = String::with_capacity(count.saturating_mul(2));
    for i in 0..count {
        if i > 0 {
            markers.push(',');
        }
        markers.push('?');
    }
    markers
}

/// The parametrized statements a template set provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Upsert binding `(partition_key, timestamp, data, record_id)`. Optional.
    Merge,
    /// Insert binding `(partition_key, timestamp, data, record_id)`.
    Insert,
    /// Update binding `(partition_key, timestamp, data, record_id)`.
    Update,
    /// Range retrieval binding `(shard_start, shard_end, time_from, time_to, p1, p2)`.
    RetrievalByRange,
    /// Id retrieval over `{{RECORD_IDS}}`.
    RetrievalByIds,
    /// Range deletion binding `(time_from, time_to)`.
    DeletionByRange,
    /// Id deletion over `{{RECORD_IDS}}`.
    DeletionByIds,
    /// Existence check; must fail when the table is absent.
    TableCheck,
    /// Count binding `(time_from, time_to)`.
    Count,
}

impl QueryKind {
    pub const ALL: [QueryKind; 9] = [
        QueryKind::Merge,
        QueryKind::Insert,
        QueryKind::Update,
        QueryKind::RetrievalByRange,
        QueryKind::RetrievalByIds,
        QueryKind::DeletionByRange,
        QueryKind::DeletionByIds,
        QueryKind::TableCheck,
        QueryKind::Count,
    ];

    /// Configuration key of this query.
    pub fn key(self) -> &'static str {
        match self {
            QueryKind::Merge => "record_merge_query",
            QueryKind::Insert => "record_insert_query",
            QueryKind::Update => "record_update_query",
            QueryKind::RetrievalByRange => "record_retrieval_query",
            QueryKind::RetrievalByIds => "record_retrieval_with_ids_query",
            QueryKind::DeletionByRange => "record_deletion_query",
            QueryKind::DeletionByIds => "record_deletion_with_ids_query",
            QueryKind::TableCheck => "record_table_check_query",
            QueryKind::Count => "record_count_query",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

fn default_true() -> bool {
    true
}

fn default_fetch_size() -> usize {
    1000
}

fn default_record_batch_size() -> usize {
    100
}

fn default_pagination_mode() -> PaginationMode {
    PaginationMode::Mode1
}

/// Dialect-specific SQL templates and capability flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTemplateSet {
    /// Category name used to look this set up (`postgresql`, `sqlite`, ...).
    pub name: String,

    /// DDL run in order by `create_table`.
    #[serde(default)]
    pub record_table_init_queries: Vec<String>,
    /// DDL run in order by `delete_table`.
    #[serde(default)]
    pub record_table_delete_queries: Vec<String>,

    #[serde(default)]
    pub record_merge_query: Option<String>,
    #[serde(default)]
    pub record_insert_query: Option<String>,
    #[serde(default)]
    pub record_update_query: Option<String>,
    #[serde(default)]
    pub record_retrieval_query: Option<String>,
    #[serde(default)]
    pub record_retrieval_with_ids_query: Option<String>,
    #[serde(default)]
    pub record_deletion_query: Option<String>,
    #[serde(default)]
    pub record_deletion_with_ids_query: Option<String>,
    #[serde(default)]
    pub record_table_check_query: Option<String>,
    #[serde(default)]
    pub record_count_query: Option<String>,

    #[serde(default = "default_pagination_mode")]
    pub pagination_mode: PaginationMode,
    #[serde(default = "default_true")]
    pub pagination_supported: bool,
    /// Blob parameters must be bound with an explicit length.
    #[serde(default)]
    pub blob_length_required: bool,
    /// Range reads stream from a server-side forward-only cursor.
    #[serde(default)]
    pub forward_only_read_enabled: bool,
    #[serde(default = "default_true")]
    pub record_count_supported: bool,
    /// Rows per round trip for forward-only reads.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Maximum ids bound into a single id query.
    #[serde(default = "default_record_batch_size")]
    pub record_batch_size: usize,
}

impl QueryTemplateSet {
    /// Parse a template set from TOML and validate it.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let set: QueryTemplateSet = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        set.validate()?;
        Ok(set)
    }

    /// Raw template for a query kind.
    pub fn template(&self, kind: QueryKind) -> Option<&str> {
        let template = match kind {
            QueryKind::Merge => &self.record_merge_query,
            QueryKind::Insert => &self.record_insert_query,
            QueryKind::Update => &self.record_update_query,
            QueryKind::RetrievalByRange => &self.record_retrieval_query,
            QueryKind::RetrievalByIds => &self.record_retrieval_with_ids_query,
            QueryKind::DeletionByRange => &self.record_deletion_query,
            QueryKind::DeletionByIds => &self.record_deletion_with_ids_query,
            QueryKind::TableCheck => &self.record_table_check_query,
            QueryKind::Count => &self.record_count_query,
        };
        template.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Whether a query kind must be configured for this dialect.
    pub fn is_required(&self, kind: QueryKind) -> bool {
        match kind {
            QueryKind::Merge => false,
            QueryKind::Count => self.record_count_supported,
            _ => true,
        }
    }

    /// Whether the dialect offers a single-statement upsert.
    pub fn has_merge(&self) -> bool {
        self.template(QueryKind::Merge).is_some()
    }

    /// Check that every required template is present and sizes are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in QueryKind::ALL {
            if self.is_required(kind) && self.template(kind).is_none() {
                return Err(ConfigError::MissingTemplate {
                    query: kind.key().to_string(),
                });
            }
        }
        if self.record_table_init_queries.is_empty() {
            return Err(ConfigError::MissingTemplate {
                query: "record_table_init_queries".to_string(),
            });
        }
        if self.record_table_delete_queries.is_empty() {
            return Err(ConfigError::MissingTemplate {
                query: "record_table_delete_queries".to_string(),
            });
        }
        for kind in [QueryKind::RetrievalByIds, QueryKind::DeletionByIds] {
            if let Some(template) = self.template(kind) {
                if !template.contains(RECORD_IDS_PLACEHOLDER) {
                    return Err(ConfigError::InvalidValue {
                        field: kind.key().to_string(),
                        value: template.to_string(),
                        reason: format!("must contain {}", RECORD_IDS_PLACEHOLDER),
                    });
                }
            }
        }
        if self.fetch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fetch_size".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.record_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "record_batch_size".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve a template for `(tenant, table)`.
    pub fn resolve(
        &self,
        kind: QueryKind,
        tenant_id: TenantId,
        table_name: &str,
    ) -> StrataResult<String> {
        let template = self.template(kind).ok_or_else(|| ConfigError::MissingTemplate {
            query: kind.key().to_string(),
        })?;
        Ok(template.replace(TABLE_NAME_PLACEHOLDER, &physical_table_name(tenant_id, table_name)))
    }

    /// Resolve an optional template; `None` when the dialect does not provide it.
    pub fn resolve_optional(
        &self,
        kind: QueryKind,
        tenant_id: TenantId,
        table_name: &str,
    ) -> Option<String> {
        self.template(kind).map(|template| {
            template.replace(TABLE_NAME_PLACEHOLDER, &physical_table_name(tenant_id, table_name))
        })
    }

    /// Resolve a template and expand its id placeholder into `id_count` markers.
    pub fn resolve_with_id_count(
        &self,
        kind: QueryKind,
        tenant_id: TenantId,
        table_name: &str,
        id_count: usize,
    ) -> StrataResult<String> {
        let query = self.resolve(kind, tenant_id, table_name)?;
        Ok(query.replace(RECORD_IDS_PLACEHOLDER, &positional_markers(id_count)))
    }

    /// Table creation DDL for `(tenant, table)`, in execution order.
    pub fn init_queries(&self, tenant_id: TenantId, table_name: &str) -> Vec<String> {
        translate_all(&self.record_table_init_queries, tenant_id, table_name)
    }

    /// Table deletion DDL for `(tenant, table)`, in execution order.
    pub fn delete_queries(&self, tenant_id: TenantId, table_name: &str) -> Vec<String> {
        translate_all(&self.record_table_delete_queries, tenant_id, table_name)
    }
}

fn translate_all(queries: &[String], tenant_id: TenantId, table_name: &str) -> Vec<String> {
    let physical = physical_table_name(tenant_id, table_name);
    queries
        .iter()
        .map(|q| q.replace(TABLE_NAME_PLACEHOLDER, &physical))
        .collect()
}
