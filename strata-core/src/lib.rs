//! STRATA Core - Record Store Data Types
//!
//! Pure data structures shared by the record store and its callers: records
//! and values, record groups, query template sets and dialect presets, the
//! partition planner, pagination translation, the value codec and the error
//! taxonomy. No I/O happens in this crate.

pub mod codec;
pub mod config;
pub mod dialect;
pub mod error;
pub mod group;
pub mod pagination;
pub mod partition;
pub mod query;
pub mod record;

pub use codec::{column_filter, JsonRecordCodec, RecordCodec};
pub use config::{StoreConfig, PROP_CATEGORY, PROP_DATASOURCE, PROP_PARTITION_COUNT};
pub use dialect::DialectCatalog;
pub use error::{
    CodecError, ConfigError, StorageError, StrataError, StrataResult, ValidationError,
};
pub use group::{IdsRecordGroup, RangeRecordGroup, RangeScan, RecordGroup};
pub use pagination::{PaginationMode, Paging, UNBOUNDED_RECORDS_COUNT};
pub use partition::{
    partition_key, plan_partitions, plan_scan, ShardRange, DEFAULT_PARTITION_COUNT,
};
pub use query::{
    physical_table_name, positional_markers, QueryKind, QueryTemplateSet,
    RECORD_IDS_PLACEHOLDER, TABLE_NAME_PLACEHOLDER,
};
pub use record::{
    current_time_millis, generate_record_id, Record, TenantId, TimestampMs, Value, ValueMap,
};
