//! PostgreSQL backend
//!
//! Connection pooling uses deadpool-postgres. Statements are prepared through
//! the per-connection statement cache; `?` markers are rewritten to `$n` and
//! integer parameters are narrowed to the types the server inferred.
//!
//! Forward-only reads stream rows from the server and pull them in chunks of
//! the configured fetch size. Other reads buffer the whole result.

use crate::sql::{DriverError, FetchOptions, RowCursor, SqlConnection, SqlParam, SqlPool, SqlRow, SqlValue};
use ::async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row, RowStream, Statement};

const PRODUCT_NAME: &str = "PostgreSQL";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait timeout when the pool is exhausted
    pub timeout: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "strata".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PgConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("STRATA_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("STRATA_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("STRATA_DB_NAME").unwrap_or_else(|_| "strata".to_string()),
            user: std::env::var("STRATA_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("STRATA_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("STRATA_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("STRATA_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<PgPool, DriverError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DriverError::new(format!("Failed to create pool: {}", e)))?;

        Ok(PgPool::new(pool))
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::debug!("Database error: {:?}", err);
        let driver = DriverError::new(err.to_string());
        match err.code() {
            Some(state) => driver.with_sqlstate(state.code()),
            None => driver,
        }
    }
}

impl From<deadpool_postgres::PoolError> for DriverError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => {
                DriverError::new("Connection pool exhausted")
            }
            deadpool_postgres::PoolError::Closed => {
                DriverError::new("Database connection pool is closed")
            }
            other => DriverError::new(format!("Failed to acquire database connection: {}", other)),
        }
    }
}

// ============================================================================
// POOL
// ============================================================================

/// Record store pool over deadpool-postgres.
#[derive(Clone)]
pub struct PgPool {
    pool: Pool,
}

impl PgPool {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    pub fn inner(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl SqlPool for PgPool {
    type Connection = PgConnection;

    async fn acquire(&self) -> Result<PgConnection, DriverError> {
        let client = self.pool.get().await?;
        Ok(PgConnection {
            client: Some(client),
            in_transaction: false,
        })
    }

    fn product_name(&self) -> &str {
        PRODUCT_NAME
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Rewrite `?` markers to `$1, $2, ...`, leaving quoted text untouched.
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut index = 0;
    let mut in_quote = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                out.push(ch);
            }
            '?' if !in_quote => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn bind_params(statement: &Statement, params: &[SqlParam]) -> Result<Vec<BoxedParam>, DriverError> {
    let types = statement.params();
    if types.len() != params.len() {
        return Err(DriverError::new(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            params.len()
        )));
    }
    types
        .iter()
        .zip(params)
        .map(|(ty, param)| coerce(ty, param))
        .collect()
}

fn coerce(ty: &Type, param: &SqlParam) -> Result<BoxedParam, DriverError> {
    let out_of_range = |v: i64| DriverError::new(format!("value {} out of range for {}", v, ty));
    Ok(match param {
        SqlParam::Int(v) if *ty == Type::INT2 => {
            Box::new(i16::try_from(*v).map_err(|_| out_of_range(*v))?)
        }
        SqlParam::Int(v) if *ty == Type::INT4 => {
            Box::new(i32::try_from(*v).map_err(|_| out_of_range(*v))?)
        }
        SqlParam::Int(v) if *ty == Type::TEXT || *ty == Type::VARCHAR => Box::new(v.to_string()),
        SqlParam::Int(v) => Box::new(*v),
        SqlParam::Text(s) => Box::new(s.clone()),
        SqlParam::Blob { data, .. } => Box::new(data.clone()),
    })
}

fn as_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn convert_row(row: &Row) -> Result<SqlRow, DriverError> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)?.map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)?.map(|v| SqlValue::Int(i64::from(v)))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)?.map(SqlValue::Int)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)?.map(|v| SqlValue::Real(f64::from(v)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i)?.map(SqlValue::Real)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i)?.map(SqlValue::Blob)
        } else {
            row.try_get::<_, Option<String>>(i)?.map(SqlValue::Text)
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(SqlRow::new(values))
}

// ============================================================================
// CONNECTION
// ============================================================================

/// A pooled PostgreSQL connection.
pub struct PgConnection {
    client: Option<Object>,
    in_transaction: bool,
}

impl PgConnection {
    fn client(&self) -> Result<&Object, DriverError> {
        self.client
            .as_ref()
            .ok_or_else(|| DriverError::new("connection already released"))
    }

    async fn prepare(&self, sql: &str) -> Result<Statement, DriverError> {
        let statement = self.client()?.prepare_cached(&rewrite_placeholders(sql)).await?;
        Ok(statement)
    }
}

#[async_trait]
impl SqlConnection for PgConnection {
    type Cursor = PgCursor;

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.client()?.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.client()?.batch_execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.client()?.batch_execute("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DriverError> {
        if params.is_empty() && !sql.contains('?') {
            self.client()?.batch_execute(sql).await?;
            return Ok(0);
        }
        let statement = self.prepare(sql).await?;
        let bound = bind_params(&statement, params)?;
        let affected = self.client()?.execute(&statement, &as_refs(&bound)).await?;
        Ok(affected)
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<SqlParam>],
    ) -> Result<u64, DriverError> {
        let statement = self.prepare(sql).await?;
        let client = self.client()?;
        let mut affected = 0;
        for params in rows {
            let bound = bind_params(&statement, params)?;
            affected += client.execute(&statement, &as_refs(&bound)).await?;
        }
        Ok(affected)
    }

    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<SqlRow>, DriverError> {
        let statement = self.prepare(sql).await?;
        let bound = bind_params(&statement, params)?;
        let rows = self.client()?.query(&statement, &as_refs(&bound)).await?;
        rows.iter().map(convert_row).collect()
    }

    async fn open_cursor(
        self,
        sql: &str,
        params: &[SqlParam],
        options: FetchOptions,
    ) -> Result<PgCursor, DriverError> {
        let statement = self.prepare(sql).await?;
        let bound = bind_params(&statement, params)?;
        let client = self.client()?;

        let source = if options.forward_only {
            let stream = client.query_raw(&statement, as_refs(&bound)).await?;
            CursorSource::Streaming(Box::pin(stream))
        } else {
            let rows = client.query(&statement, &as_refs(&bound)).await?;
            let converted = rows.iter().map(convert_row).collect::<Result<Vec<_>, _>>()?;
            CursorSource::Buffered(converted.into())
        };

        Ok(PgCursor {
            source,
            chunk: VecDeque::new(),
            fetch_size: options.fetch_size.max(1),
            _conn: self,
        })
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if self.in_transaction {
                tracing::warn!("Detaching PostgreSQL connection with an open transaction");
                // Closing the client aborts the transaction server-side.
                drop(Object::take(client));
            }
        }
    }
}

// ============================================================================
// CURSOR
// ============================================================================

enum CursorSource {
    Streaming(Pin<Box<RowStream>>),
    Buffered(VecDeque<SqlRow>),
}

/// Rows of one query, holding the connection until dropped.
pub struct PgCursor {
    source: CursorSource,
    chunk: VecDeque<SqlRow>,
    fetch_size: usize,
    _conn: PgConnection,
}

#[async_trait]
impl RowCursor for PgCursor {
    async fn next_row(&mut self) -> Result<Option<SqlRow>, DriverError> {
        let stream = match &mut self.source {
            CursorSource::Buffered(rows) => return Ok(rows.pop_front()),
            CursorSource::Streaming(stream) => stream,
        };
        if self.chunk.is_empty() {
            while self.chunk.len() < self.fetch_size {
                match stream.next().await {
                    Some(row) => self.chunk.push_back(convert_row(&row?)?),
                    None => break,
                }
            }
        }
        Ok(self.chunk.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_placeholders() {
        assert_eq!(
            rewrite_placeholders("SELECT * FROM t WHERE a = ? AND b IN (?,?)"),
            "SELECT * FROM t WHERE a = $1 AND b IN ($2,$3)"
        );
        assert_eq!(rewrite_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_rewrite_skips_quoted_markers() {
        assert_eq!(
            rewrite_placeholders("SELECT '?' FROM t WHERE a = ?"),
            "SELECT '?' FROM t WHERE a = $1"
        );
    }

    #[test]
    fn test_coerce_narrows_integers() {
        assert!(coerce(&Type::INT4, &SqlParam::Int(7)).is_ok());
        assert!(coerce(&Type::INT4, &SqlParam::Int(i64::from(i32::MAX) + 1)).is_err());
        assert!(coerce(&Type::INT2, &SqlParam::Int(70_000)).is_err());
        assert!(coerce(&Type::INT8, &SqlParam::Int(i64::MIN)).is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = PgConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_size, 16);
    }
}
