//! Built-in dialect presets and the catalog that resolves them.
//!
//! Every preset stores records in the same four-column layout:
//! `record_id` (primary key), `timestamp`, `data` (value blob) and
//! `partition_key`, with secondary indexes on `timestamp` and `partition_key`.

use crate::{ConfigError, PaginationMode, QueryTemplateSet};
use std::collections::HashMap;

// ============================================================================
// SHARED TEMPLATES
// ============================================================================

const COLUMNS_IN_BIND_ORDER: &str = "partition_key, timestamp, data, record_id";

const RANGE_FILTER: &str =
    "partition_key >= ? AND partition_key < ? AND timestamp >= ? AND timestamp < ?";

fn insert_query() -> String {
    format!(
        "INSERT INTO {{{{TABLE_NAME}}}} ({}) VALUES (?, ?, ?, ?)",
        COLUMNS_IN_BIND_ORDER
    )
}

fn update_query() -> String {
    "UPDATE {{TABLE_NAME}} SET partition_key = ?, timestamp = ?, data = ? WHERE record_id = ?"
        .to_string()
}

fn retrieval_with_ids_query() -> String {
    "SELECT record_id, timestamp, data FROM {{TABLE_NAME}} WHERE record_id IN ({{RECORD_IDS}})"
        .to_string()
}

fn deletion_query() -> String {
    "DELETE FROM {{TABLE_NAME}} WHERE timestamp >= ? AND timestamp < ?".to_string()
}

fn deletion_with_ids_query() -> String {
    "DELETE FROM {{TABLE_NAME}} WHERE record_id IN ({{RECORD_IDS}})".to_string()
}

fn count_query() -> String {
    "SELECT COUNT(*) FROM {{TABLE_NAME}} WHERE timestamp >= ? AND timestamp < ?".to_string()
}

fn index_queries() -> Vec<String> {
    vec![
        "CREATE INDEX {{TABLE_NAME}}_ts ON {{TABLE_NAME}} (timestamp)".to_string(),
        "CREATE INDEX {{TABLE_NAME}}_pk ON {{TABLE_NAME}} (partition_key)".to_string(),
    ]
}

fn create_table_query(id_type: &str, ts_type: &str, blob_type: &str, key_type: &str) -> String {
    format!(
        "CREATE TABLE {{{{TABLE_NAME}}}} (record_id {} NOT NULL, timestamp {}, data {}, \
         partition_key {}, PRIMARY KEY (record_id))",
        id_type, ts_type, blob_type, key_type
    )
}

fn base(name: &str, init: Vec<String>) -> QueryTemplateSet {
    QueryTemplateSet {
        name: name.to_string(),
        record_table_init_queries: init,
        record_table_delete_queries: vec!["DROP TABLE {{TABLE_NAME}}".to_string()],
        record_merge_query: None,
        record_insert_query: Some(insert_query()),
        record_update_query: Some(update_query()),
        record_retrieval_query: None,
        record_retrieval_with_ids_query: Some(retrieval_with_ids_query()),
        record_deletion_query: Some(deletion_query()),
        record_deletion_with_ids_query: Some(deletion_with_ids_query()),
        record_table_check_query: Some("SELECT 1 FROM {{TABLE_NAME}} LIMIT 1".to_string()),
        record_count_query: Some(count_query()),
        pagination_mode: PaginationMode::Mode1,
        pagination_supported: true,
        blob_length_required: false,
        forward_only_read_enabled: false,
        record_count_supported: true,
        fetch_size: 1000,
        record_batch_size: 100,
    }
}

fn with_indexes(create: String) -> Vec<String> {
    let mut init = vec![create];
    init.extend(index_queries());
    init
}

// ============================================================================
// PRESETS
// ============================================================================

/// PostgreSQL: `OFFSET ? LIMIT ?`, `ON CONFLICT` upsert, streaming reads.
pub fn postgresql() -> QueryTemplateSet {
    let mut set = base(
        "postgresql",
        with_indexes(create_table_query("VARCHAR(50)", "BIGINT", "BYTEA", "INTEGER")),
    );
    set.record_merge_query = Some(format!(
        "INSERT INTO {{{{TABLE_NAME}}}} ({}) VALUES (?, ?, ?, ?) ON CONFLICT (record_id) \
         DO UPDATE SET partition_key = EXCLUDED.partition_key, \
         timestamp = EXCLUDED.timestamp, data = EXCLUDED.data",
        COLUMNS_IN_BIND_ORDER
    ));
    set.record_retrieval_query = Some(format!(
        "SELECT record_id, timestamp, data FROM {{{{TABLE_NAME}}}} WHERE {} \
         ORDER BY timestamp, record_id OFFSET ? LIMIT ?",
        RANGE_FILTER
    ));
    set.forward_only_read_enabled = true;
    set
}

/// SQLite: `LIMIT ?, ?`, `ON CONFLICT` upsert, buffered reads.
pub fn sqlite() -> QueryTemplateSet {
    let mut set = base(
        "sqlite",
        with_indexes(create_table_query("VARCHAR(50)", "INTEGER", "BLOB", "INTEGER")),
    );
    set.record_merge_query = Some(format!(
        "INSERT INTO {{{{TABLE_NAME}}}} ({}) VALUES (?, ?, ?, ?) ON CONFLICT (record_id) \
         DO UPDATE SET partition_key = excluded.partition_key, \
         timestamp = excluded.timestamp, data = excluded.data",
        COLUMNS_IN_BIND_ORDER
    ));
    set.record_retrieval_query = Some(format!(
        "SELECT record_id, timestamp, data FROM {{{{TABLE_NAME}}}} WHERE {} \
         ORDER BY timestamp, record_id LIMIT ?, ?",
        RANGE_FILTER
    ));
    set
}

/// MySQL: `LIMIT ?, ?`, `ON DUPLICATE KEY UPDATE` upsert.
pub fn mysql() -> QueryTemplateSet {
    let mut set = base(
        "mysql",
        with_indexes(create_table_query("VARCHAR(50)", "BIGINT", "LONGBLOB", "INTEGER")),
    );
    set.record_merge_query = Some(format!(
        "INSERT INTO {{{{TABLE_NAME}}}} ({}) VALUES (?, ?, ?, ?) ON DUPLICATE KEY UPDATE \
         partition_key = VALUES(partition_key), timestamp = VALUES(timestamp), \
         data = VALUES(data)",
        COLUMNS_IN_BIND_ORDER
    ));
    set.record_retrieval_query = Some(format!(
        "SELECT record_id, timestamp, data FROM {{{{TABLE_NAME}}}} WHERE {} \
         ORDER BY timestamp, record_id LIMIT ?, ?",
        RANGE_FILTER
    ));
    set
}

/// Oracle: `ROWNUM` windows bound as (upper, offset), `MERGE` upsert.
pub fn oracle() -> QueryTemplateSet {
    let mut set = base(
        "oracle",
        with_indexes(create_table_query("VARCHAR2(50)", "NUMBER(19)", "BLOB", "NUMBER(10)")),
    );
    set.record_merge_query = Some(
        "MERGE INTO {{TABLE_NAME}} dest USING (SELECT ? partition_key, ? timestamp, ? data, \
         ? record_id FROM dual) src ON (dest.record_id = src.record_id) \
         WHEN MATCHED THEN UPDATE SET dest.partition_key = src.partition_key, \
         dest.timestamp = src.timestamp, dest.data = src.data \
         WHEN NOT MATCHED THEN INSERT (partition_key, timestamp, data, record_id) \
         VALUES (src.partition_key, src.timestamp, src.data, src.record_id)"
            .to_string(),
    );
    set.record_retrieval_query = Some(format!(
        "SELECT record_id, timestamp, data FROM (SELECT ROWNUM rnum, a.* FROM \
         (SELECT record_id, timestamp, data FROM {{{{TABLE_NAME}}}} WHERE {} \
         ORDER BY timestamp, record_id) a WHERE ROWNUM <= ?) WHERE rnum > ?",
        RANGE_FILTER
    ));
    set.record_table_check_query =
        Some("SELECT 1 FROM {{TABLE_NAME}} WHERE ROWNUM = 1".to_string());
    set.pagination_mode = PaginationMode::Mode2;
    set.blob_length_required = true;
    set
}

/// SQL Server: `ROW_NUMBER()` windows bound as (offset, offset + count), no upsert.
pub fn mssql() -> QueryTemplateSet {
    let mut set = base(
        "mssql",
        with_indexes(create_table_query("VARCHAR(50)", "BIGINT", "VARBINARY(MAX)", "INTEGER")),
    );
    set.record_retrieval_query = Some(format!(
        "SELECT record_id, timestamp, data FROM (SELECT record_id, timestamp, data, \
         ROW_NUMBER() OVER (ORDER BY timestamp, record_id) AS rn FROM {{{{TABLE_NAME}}}} \
         WHERE {}) AS paged WHERE rn > ? AND rn <= ?",
        RANGE_FILTER
    ));
    set.record_table_check_query = Some("SELECT TOP 1 1 FROM {{TABLE_NAME}}".to_string());
    set.pagination_mode = PaginationMode::Mode3;
    set
}

// ============================================================================
// CATALOG
// ============================================================================

/// Driver product names mapped to preset categories.
const PRODUCT_ALIASES: &[(&str, &str)] = &[
    ("postgresql", "postgresql"),
    ("postgres", "postgresql"),
    ("sqlite", "sqlite"),
    ("mysql", "mysql"),
    ("mariadb", "mysql"),
    ("oracle", "oracle"),
    ("microsoft sql server", "mssql"),
    ("sql server", "mssql"),
    ("mssql", "mssql"),
];

/// Template sets keyed by lowercase category name.
#[derive(Debug, Clone, Default)]
pub struct DialectCatalog {
    sets: HashMap<String, QueryTemplateSet>,
}

impl DialectCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding every built-in preset.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for set in [postgresql(), sqlite(), mysql(), oracle(), mssql()] {
            catalog.sets.insert(set.name.clone(), set);
        }
        catalog
    }

    /// Add or replace a template set after validating it.
    pub fn register(&mut self, set: QueryTemplateSet) -> Result<(), ConfigError> {
        set.validate()?;
        self.sets.insert(set.name.to_lowercase(), set);
        Ok(())
    }

    /// Parse a TOML template set and register it.
    pub fn register_toml_str(&mut self, input: &str) -> Result<(), ConfigError> {
        let set = QueryTemplateSet::from_toml_str(input)?;
        self.register(set)
    }

    /// Look up a template set by category name (case-insensitive).
    pub fn get(&self, category: &str) -> Result<&QueryTemplateSet, ConfigError> {
        self.sets
            .get(&category.trim().to_lowercase())
            .ok_or_else(|| ConfigError::UnknownDialect {
                name: category.to_string(),
            })
    }

    /// Look up a template set by the product name a driver reports.
    pub fn for_product(&self, product_name: &str) -> Result<&QueryTemplateSet, ConfigError> {
        let product = product_name.trim().to_lowercase();
        PRODUCT_ALIASES
            .iter()
            .find(|(alias, _)| product.starts_with(alias))
            .map(|(_, category)| *category)
            .map_or_else(|| self.get(&product), |category| self.get(category))
            .map_err(|_| ConfigError::UnknownDialect {
                name: product_name.to_string(),
            })
    }

    /// Registered category names, sorted.
    pub fn categories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
