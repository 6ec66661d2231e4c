//! SQLite backend.
//!
//! Connections to one database file are pooled with deadpool. A connection
//! dropped while a transaction is still open is detached from the pool
//! instead of being reused.
//!
//! SQLite calls are synchronous and run on the calling task.

use crate::sql::{DriverError, FetchOptions, RowCursor, SqlConnection, SqlParam, SqlPool, SqlRow, SqlValue};
use ::async_trait::async_trait;
use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use deadpool::Runtime;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PRODUCT_NAME: &str = "SQLite";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Embedded database configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file path.
    pub path: PathBuf,
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait timeout when the pool is exhausted
    pub timeout: Duration,
}

impl SqliteConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
            max_size: 8,
            timeout: Duration::from_secs(30),
        }
    }

    /// Create from environment variables.
    ///
    /// - `STRATA_SQLITE_PATH`: database file (default: `strata.db`)
    /// - `STRATA_SQLITE_BUSY_TIMEOUT_MS`: busy timeout (default: 5000)
    /// - `STRATA_SQLITE_POOL_SIZE`: maximum pool size (default: 8)
    /// - `STRATA_SQLITE_TIMEOUT`: pool wait timeout in seconds (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::new("strata.db");
        Self {
            path: std::env::var("STRATA_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            busy_timeout: std::env::var("STRATA_SQLITE_BUSY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
            max_size: std::env::var("STRATA_SQLITE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("STRATA_SQLITE_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn create_pool(&self) -> Result<SqlitePool, DriverError> {
        SqlitePool::open(self.clone())
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        tracing::debug!("SQLite error: {:?}", err);
        let code = err.sqlite_error_code().map(|c| format!("{:?}", c));
        let mut driver = DriverError::new(err.to_string());
        driver.sqlstate = code;
        driver
    }
}

impl From<PoolError<DriverError>> for DriverError {
    fn from(err: PoolError<DriverError>) -> Self {
        tracing::error!("SQLite pool error: {:?}", err);

        match err {
            PoolError::Backend(driver) => driver,
            PoolError::Timeout(_) => DriverError::new("Connection pool exhausted"),
            PoolError::Closed => DriverError::new("SQLite connection pool is closed"),
            other => DriverError::new(format!("Failed to acquire SQLite connection: {}", other)),
        }
    }
}

// ============================================================================
// POOL
// ============================================================================

/// Opens and recycles connections to one database file.
#[derive(Debug)]
pub struct SqliteManager {
    config: SqliteConfig,
}

impl SqliteManager {
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }
}

fn open_connection(config: &SqliteConfig) -> Result<Connection, DriverError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(&config.path, flags)?;
    conn.busy_timeout(config.busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    Ok(conn)
}

impl managed::Manager for SqliteManager {
    type Type = Connection;
    type Error = DriverError;

    async fn create(&self) -> Result<Connection, DriverError> {
        open_connection(&self.config)
    }

    async fn recycle(&self, conn: &mut Connection, _: &Metrics) -> RecycleResult<DriverError> {
        if !conn.is_autocommit() {
            return Err(RecycleError::message("connection has an open transaction"));
        }
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| RecycleError::Backend(e.into()))
    }
}

/// Connection pool over a single SQLite database file.
#[derive(Clone)]
pub struct SqlitePool {
    pool: Pool<SqliteManager>,
    path: PathBuf,
}

impl SqlitePool {
    /// Build the pool, verifying the database can be opened.
    pub fn open(config: SqliteConfig) -> Result<Self, DriverError> {
        drop(open_connection(&config)?);
        let path = config.path.clone();
        let max_size = config.max_size;
        let timeout = config.timeout;
        let pool = Pool::builder(SqliteManager::new(config))
            .max_size(max_size)
            .wait_timeout(Some(timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| DriverError::new(format!("Failed to create pool: {}", e)))?;
        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connections currently open, idle or checked out.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Open connections waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.pool.status().available
    }
}

#[async_trait]
impl SqlPool for SqlitePool {
    type Connection = SqliteConnection;

    async fn acquire(&self) -> Result<SqliteConnection, DriverError> {
        let conn = self.pool.get().await?;
        Ok(SqliteConnection { conn: Some(conn) })
    }

    fn product_name(&self) -> &str {
        PRODUCT_NAME
    }
}

// ============================================================================
// CONNECTION
// ============================================================================

/// A connection checked out of a [`SqlitePool`].
pub struct SqliteConnection {
    conn: Option<Object<SqliteManager>>,
}

impl SqliteConnection {
    fn raw(&self) -> Result<&Connection, DriverError> {
        self.conn
            .as_deref()
            .ok_or_else(|| DriverError::new("connection already released"))
    }

    fn run_query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqlRow>, DriverError> {
        let conn = self.raw()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sqlite)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(from_sqlite(row.get_ref(i)?));
            }
            out.push(SqlRow::new(values));
        }
        Ok(out)
    }
}

fn to_sqlite(param: &SqlParam) -> SqliteValue {
    match param {
        SqlParam::Int(v) => SqliteValue::Integer(*v),
        SqlParam::Text(s) => SqliteValue::Text(s.clone()),
        SqlParam::Blob { data, .. } => SqliteValue::Blob(data.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

#[async_trait]
impl SqlConnection for SqliteConnection {
    type Cursor = SqliteCursor;

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.raw()?.execute_batch("BEGIN")?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.raw()?.execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.raw()?.execute_batch("ROLLBACK")?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DriverError> {
        let conn = self.raw()?;
        let affected = if params.is_empty() {
            conn.execute(sql, [])?
        } else {
            let mut stmt = conn.prepare_cached(sql)?;
            stmt.execute(params_from_iter(params.iter().map(to_sqlite)))?
        };
        Ok(affected as u64)
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<SqlParam>],
    ) -> Result<u64, DriverError> {
        let conn = self.raw()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let mut affected = 0u64;
        for params in rows {
            affected += stmt.execute(params_from_iter(params.iter().map(to_sqlite)))? as u64;
        }
        Ok(affected)
    }

    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<SqlRow>, DriverError> {
        self.run_query(sql, params)
    }

    async fn open_cursor(
        self,
        sql: &str,
        params: &[SqlParam],
        _options: FetchOptions,
    ) -> Result<SqliteCursor, DriverError> {
        let rows = self.run_query(sql, params)?;
        Ok(SqliteCursor {
            rows: rows.into(),
            _conn: self,
        })
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !conn.is_autocommit() {
                tracing::warn!("Detaching SQLite connection with an open transaction");
                drop(Object::take(conn));
            }
        }
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Buffered rows of one query, holding the connection until dropped.
pub struct SqliteCursor {
    rows: VecDeque<SqlRow>,
    _conn: SqliteConnection,
}

#[async_trait]
impl RowCursor for SqliteCursor {
    async fn next_row(&mut self) -> Result<Option<SqlRow>, DriverError> {
        Ok(self.rows.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool(dir: &TempDir) -> SqlitePool {
        SqliteConfig::new(dir.path().join("test.db"))
            .create_pool()
            .expect("open pool")
    }

    #[tokio::test]
    async fn test_connection_returns_to_pool() {
        let dir = TempDir::new().expect("tempdir");
        let pool = pool(&dir);
        assert_eq!(pool.pool_size(), 0);

        let conn = pool.acquire().await.expect("acquire");
        assert_eq!(pool.pool_size(), 1);
        assert_eq!(pool.idle_count(), 0);
        drop(conn);
        assert_eq!(pool.idle_count(), 1);

        let _again = pool.acquire().await.expect("acquire");
        assert_eq!(pool.pool_size(), 1);
    }

    #[tokio::test]
    async fn test_connection_with_open_transaction_is_detached() {
        let dir = TempDir::new().expect("tempdir");
        let pool = pool(&dir);

        let mut conn = pool.acquire().await.expect("acquire");
        conn.begin().await.expect("begin");
        drop(conn);
        assert_eq!(pool.pool_size(), 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_caps_live_connections() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = SqliteConfig::new(dir.path().join("test.db"));
        config.max_size = 1;
        config.timeout = Duration::from_millis(50);
        let pool = config.create_pool().expect("open pool");

        let held = pool.acquire().await.expect("acquire");
        let err = pool.acquire().await.err().expect("pool exhausted");
        assert_eq!(err.message, "Connection pool exhausted");
        assert_eq!(pool.pool_size(), 1);

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[test]
    fn test_open_rejects_unreachable_path() {
        let dir = TempDir::new().expect("tempdir");
        let config = SqliteConfig::new(dir.path().join("no-such-dir").join("test.db"));
        assert!(config.create_pool().is_err());
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let dir = TempDir::new().expect("tempdir");
        let pool = pool(&dir);
        let mut conn = pool.acquire().await.expect("acquire");

        conn.execute("CREATE TABLE t (id TEXT PRIMARY KEY, n INTEGER, b BLOB)", &[])
            .await
            .expect("create");
        let rows = vec![
            vec![SqlParam::from("a"), SqlParam::Int(1), SqlParam::blob(vec![1], false)],
            vec![SqlParam::from("b"), SqlParam::Int(2), SqlParam::blob(vec![2], true)],
        ];
        let affected = conn
            .execute_batch("INSERT INTO t (id, n, b) VALUES (?, ?, ?)", &rows)
            .await
            .expect("insert");
        assert_eq!(affected, 2);

        let result = conn
            .query_rows("SELECT id, n, b FROM t WHERE n >= ? ORDER BY n", &[SqlParam::Int(2)])
            .await
            .expect("query");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get_text(0).as_deref(), Ok("b"));
        assert_eq!(result[0].get_blob(2), Ok(Some(&[2u8][..])));
    }

    #[tokio::test]
    async fn test_cursor_holds_connection_until_dropped() {
        let dir = TempDir::new().expect("tempdir");
        let pool = pool(&dir);
        let conn = pool.acquire().await.expect("acquire");

        let mut cursor = conn
            .open_cursor("SELECT 1 UNION ALL SELECT 2", &[], FetchOptions::buffered())
            .await
            .expect("cursor");
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(cursor.next_row().await.expect("row").map(|r| r.get_i64(0)), Some(Ok(1)));
        assert_eq!(cursor.next_row().await.expect("row").map(|r| r.get_i64(0)), Some(Ok(2)));
        assert_eq!(cursor.next_row().await.expect("row"), None);
        drop(cursor);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_statement_reports_error() {
        let dir = TempDir::new().expect("tempdir");
        let pool = pool(&dir);
        let mut conn = pool.acquire().await.expect("acquire");
        let err = conn
            .query_rows("SELECT 1 FROM missing_table", &[])
            .await
            .unwrap_err();
        assert!(err.message.contains("missing_table"));
    }
}
