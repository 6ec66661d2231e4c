//! Driver seam.
//!
//! The record store talks to databases only through these traits. A pool
//! hands out connections; a connection runs statements and transactions and
//! can be turned into a row cursor that owns it. Dropping a connection or a
//! cursor returns the underlying resource to its pool.
//!
//! Statements use `?` positional markers. Backends whose native syntax
//! differs rewrite them.

use ::async_trait::async_trait;
use strata_core::{StorageError, StrataError};
use thiserror::Error;

// ============================================================================
// VALUES
// ============================================================================

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    /// Integer parameter; backends narrow it to the declared column type.
    Int(i64),
    Text(String),
    /// Binary parameter, with its byte length when the dialect requires it.
    Blob { data: Vec<u8>, length: Option<usize> },
}

impl SqlParam {
    pub fn blob(data: Vec<u8>, with_length: bool) -> Self {
        let length = with_length.then_some(data.len());
        SqlParam::Blob { data, length }
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<u32> for SqlParam {
    fn from(v: u32) -> Self {
        SqlParam::Int(i64::from(v))
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

/// A column value read from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// One result row, columns in select order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRow {
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Integer column. Text holding a number is accepted.
    pub fn get_i64(&self, index: usize) -> Result<i64, DriverError> {
        match self.get(index) {
            Some(SqlValue::Int(v)) => Ok(*v),
            Some(SqlValue::Text(s)) => s
                .trim()
                .parse()
                .map_err(|_| DriverError::new(format!("column {} is not an integer: {}", index, s))),
            other => Err(DriverError::new(format!(
                "column {} is not an integer: {:?}",
                index, other
            ))),
        }
    }

    /// Text column.
    pub fn get_text(&self, index: usize) -> Result<String, DriverError> {
        match self.get(index) {
            Some(SqlValue::Text(s)) => Ok(s.clone()),
            Some(SqlValue::Int(v)) => Ok(v.to_string()),
            other => Err(DriverError::new(format!(
                "column {} is not text: {:?}",
                index, other
            ))),
        }
    }

    /// Nullable binary column.
    pub fn get_blob(&self, index: usize) -> Result<Option<&[u8]>, DriverError> {
        match self.get(index) {
            Some(SqlValue::Blob(b)) => Ok(Some(b.as_slice())),
            Some(SqlValue::Text(s)) => Ok(Some(s.as_bytes())),
            Some(SqlValue::Null) => Ok(None),
            other => Err(DriverError::new(format!(
                "column {} is not binary: {:?}",
                index, other
            ))),
        }
    }
}

/// How a cursor should fetch its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Rows per round trip when streaming.
    pub fetch_size: usize,
    /// Stream rows from the server instead of buffering the whole result.
    pub forward_only: bool,
}

impl FetchOptions {
    /// Buffer the whole result client-side.
    pub fn buffered() -> Self {
        Self {
            fetch_size: usize::MAX,
            forward_only: false,
        }
    }

    pub fn streaming(fetch_size: usize) -> Self {
        Self {
            fetch_size: fetch_size.max(1),
            forward_only: true,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// An error reported by a database driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
    /// Five character SQLSTATE, when the driver reports one.
    pub sqlstate: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: None,
        }
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    /// Wrap into a storage error carrying the failed operation.
    pub fn into_storage(self, operation: &str) -> StrataError {
        StorageError::Driver {
            operation: operation.to_string(),
            reason: self.message,
        }
        .into()
    }

    /// Wrap a failed acquisition.
    pub fn into_unavailable(self) -> StrataError {
        StorageError::ConnectionUnavailable {
            reason: self.message,
        }
        .into()
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// A source of database connections.
#[async_trait]
pub trait SqlPool: Send + Sync + 'static {
    type Connection: SqlConnection;

    /// Check out a connection. It is returned when dropped.
    async fn acquire(&self) -> Result<Self::Connection, DriverError>;

    /// Database product name, used to pick a dialect when none is configured.
    fn product_name(&self) -> &str;
}

/// A checked-out connection. Starts in autocommit mode.
#[async_trait]
pub trait SqlConnection: Send + Sized + 'static {
    type Cursor: RowCursor;

    async fn begin(&mut self) -> Result<(), DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Run a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DriverError>;

    /// Run one statement once per parameter row.
    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<SqlParam>],
    ) -> Result<u64, DriverError> {
        let mut affected = 0;
        for params in rows {
            affected += self.execute(sql, params).await?;
        }
        Ok(affected)
    }

    /// Run a query and collect every row.
    async fn query_rows(&mut self, sql: &str, params: &[SqlParam])
        -> Result<Vec<SqlRow>, DriverError>;

    /// Run a query and hand the connection over to a cursor over its rows.
    async fn open_cursor(
        self,
        sql: &str,
        params: &[SqlParam],
        options: FetchOptions,
    ) -> Result<Self::Cursor, DriverError>;
}

/// Rows of an open query. Owns the connection it reads from.
#[async_trait]
pub trait RowCursor: Send + 'static {
    /// Next row, or `None` when the result is exhausted.
    async fn next_row(&mut self) -> Result<Option<SqlRow>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_length_only_when_required() {
        assert_eq!(
            SqlParam::blob(vec![1, 2, 3], true),
            SqlParam::Blob {
                data: vec![1, 2, 3],
                length: Some(3)
            }
        );
        assert_eq!(
            SqlParam::blob(vec![1], false),
            SqlParam::Blob {
                data: vec![1],
                length: None
            }
        );
    }

    #[test]
    fn test_row_accessors() {
        let row = SqlRow::new(vec![
            SqlValue::Text("id-1".to_string()),
            SqlValue::Int(42),
            SqlValue::Null,
            SqlValue::Text("17".to_string()),
        ]);
        assert_eq!(row.get_text(0).as_deref(), Ok("id-1"));
        assert_eq!(row.get_i64(1), Ok(42));
        assert_eq!(row.get_blob(2), Ok(None));
        assert_eq!(row.get_i64(3), Ok(17));
        assert!(row.get_i64(0).is_err());
        assert!(row.get_i64(9).is_err());
    }

    #[test]
    fn test_driver_error_wrapping() {
        let err = DriverError::new("boom").with_sqlstate("42P01");
        assert_eq!(err.sqlstate.as_deref(), Some("42P01"));
        let wrapped = err.into_storage("reading records");
        assert_eq!(
            wrapped,
            StrataError::Storage(StorageError::Driver {
                operation: "reading records".to_string(),
                reason: "boom".to_string()
            })
        );
    }

    #[test]
    fn test_streaming_fetch_size_is_positive() {
        assert_eq!(FetchOptions::streaming(0).fetch_size, 1);
        assert!(!FetchOptions::buffered().forward_only);
    }
}
