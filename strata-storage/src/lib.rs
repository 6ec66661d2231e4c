//! STRATA Storage - RDBMS Record Store
//!
//! Persists tenant-scoped records into a relational database through a
//! dialect-specific query template set. The store itself is written against
//! the driver seam in [`sql`]; PostgreSQL and SQLite backends are provided
//! behind the `postgres` and `sqlite` features.

mod iterator;
mod lifecycle;
mod reader;
mod record_store;
mod registry;
mod store;
mod writer;

pub mod sql;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use iterator::{IteratorState, RecordIterator};
pub use lifecycle::RECORD_COUNT_UNSUPPORTED;
pub use reader::Cursor;
pub use record_store::RecordStore;
pub use registry::DataSourceRegistry;
pub use sql::{DriverError, FetchOptions, RowCursor, SqlConnection, SqlParam, SqlPool, SqlRow, SqlValue};
pub use store::RdbmsRecordStore;
pub use writer::WriteStrategy;

#[cfg(feature = "postgres")]
pub use postgres::{PgConfig, PgPool};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConfig, SqliteManager, SqlitePool};
