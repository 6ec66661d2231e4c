//! STRATA Test Utilities
//!
//! Shared helpers for testing the record store:
//! - Instrumented pool wrapper that counts connections and logs statements
//! - Proptest generators for values, value maps and records
//! - Temporary SQLite-backed store fixtures
//! - Assertions over [`StrataResult`] values

use ::async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once};

// Re-export core types for convenience
pub use strata_core::*;
pub use strata_storage::{
    DriverError, FetchOptions, RdbmsRecordStore, RecordIterator, RecordStore, RowCursor,
    SqlConnection, SqlParam, SqlPool, SqlRow, SqliteConfig, SqlitePool,
};

// Re-export proptest for property-based testing
pub use proptest;

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`. Safe to call from every test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// INSTRUMENTED POOL
// ============================================================================

#[derive(Default)]
struct Tally {
    acquisitions: AtomicUsize,
    live: AtomicUsize,
    statements: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    fail_acquire: AtomicBool,
}

impl Tally {
    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log a statement and fail it if it matches an injected pattern.
    fn record(&self, sql: &str) -> Result<(), DriverError> {
        Self::lock(&self.statements).push(sql.to_string());
        let injected = Self::lock(&self.failing)
            .iter()
            .any(|pattern| sql.contains(pattern.as_str()));
        if injected {
            return Err(DriverError::new(format!("injected failure: {}", sql)));
        }
        Ok(())
    }
}

/// Decrements the live count when the connection (or its cursor) goes away.
struct LiveGuard(Arc<Tally>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pool wrapper for leak accounting and fault injection.
///
/// Every statement, including `BEGIN`, `COMMIT` and `ROLLBACK`, is logged
/// before it reaches the wrapped pool. A connection counts as live until it
/// is dropped, or until the cursor that took it over is dropped.
pub struct InstrumentedPool<P: SqlPool> {
    inner: P,
    tally: Arc<Tally>,
}

impl<P: SqlPool> InstrumentedPool<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            tally: Arc::new(Tally::default()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Connections handed out so far.
    pub fn acquisitions(&self) -> usize {
        self.tally.acquisitions.load(Ordering::SeqCst)
    }

    /// Connections currently checked out.
    pub fn live_connections(&self) -> usize {
        self.tally.live.load(Ordering::SeqCst)
    }

    /// Every statement seen, in order.
    pub fn statements(&self) -> Vec<String> {
        Tally::lock(&self.tally.statements).clone()
    }

    /// Statements containing `pattern`.
    pub fn statements_matching(&self, pattern: &str) -> Vec<String> {
        Tally::lock(&self.tally.statements)
            .iter()
            .filter(|sql| sql.contains(pattern))
            .cloned()
            .collect()
    }

    /// Forget logged statements and reset the acquisition counter.
    pub fn reset(&self) {
        Tally::lock(&self.tally.statements).clear();
        self.tally.acquisitions.store(0, Ordering::SeqCst);
    }

    /// Fail every statement containing `pattern` until cleared.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        Tally::lock(&self.tally.failing).push(pattern.into());
    }

    pub fn clear_failures(&self) {
        Tally::lock(&self.tally.failing).clear();
        self.tally.fail_acquire.store(false, Ordering::SeqCst);
    }

    /// Make `acquire` fail.
    pub fn fail_acquire(&self) {
        self.tally.fail_acquire.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl<P: SqlPool> SqlPool for InstrumentedPool<P> {
    type Connection = InstrumentedConnection<P::Connection>;

    async fn acquire(&self) -> Result<Self::Connection, DriverError> {
        if self.tally.fail_acquire.load(Ordering::SeqCst) {
            return Err(DriverError::new("injected failure: acquire"));
        }
        let inner = self.inner.acquire().await?;
        self.tally.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.tally.live.fetch_add(1, Ordering::SeqCst);
        Ok(InstrumentedConnection {
            inner,
            tally: Arc::clone(&self.tally),
            live: LiveGuard(Arc::clone(&self.tally)),
        })
    }

    fn product_name(&self) -> &str {
        self.inner.product_name()
    }
}

/// Connection checked out of an [`InstrumentedPool`].
pub struct InstrumentedConnection<C: SqlConnection> {
    inner: C,
    tally: Arc<Tally>,
    live: LiveGuard,
}

#[async_trait]
impl<C: SqlConnection> SqlConnection for InstrumentedConnection<C> {
    type Cursor = InstrumentedCursor<C::Cursor>;

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.tally.record("BEGIN")?;
        self.inner.begin().await
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.tally.record("COMMIT")?;
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.tally.record("ROLLBACK")?;
        self.inner.rollback().await
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DriverError> {
        self.tally.record(sql)?;
        self.inner.execute(sql, params).await
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<SqlParam>],
    ) -> Result<u64, DriverError> {
        self.tally.record(sql)?;
        self.inner.execute_batch(sql, rows).await
    }

    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<SqlRow>, DriverError> {
        self.tally.record(sql)?;
        self.inner.query_rows(sql, params).await
    }

    async fn open_cursor(
        self,
        sql: &str,
        params: &[SqlParam],
        options: FetchOptions,
    ) -> Result<Self::Cursor, DriverError> {
        let Self { inner, tally, live } = self;
        tally.record(sql)?;
        let cursor = inner.open_cursor(sql, params, options).await?;
        Ok(InstrumentedCursor {
            inner: cursor,
            _live: live,
        })
    }
}

/// Cursor holding the live slot of the connection it took over.
pub struct InstrumentedCursor<R: RowCursor> {
    inner: R,
    _live: LiveGuard,
}

#[async_trait]
impl<R: RowCursor> RowCursor for InstrumentedCursor<R> {
    async fn next_row(&mut self) -> Result<Option<SqlRow>, DriverError> {
        self.inner.next_row().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating STRATA types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a column value of any kind. Floats are finite so they compare
    /// equal after a codec round trip.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(Value::Int),
            any::<i64>().prop_map(Value::Long),
            (-1.0e6f32..1.0e6f32).prop_map(Value::Float),
            (-1.0e12f64..1.0e12f64).prop_map(Value::Double),
            "[a-zA-Z0-9 _-]{0,32}".prop_map(Value::String),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Binary),
        ]
    }

    /// Generate a column name.
    pub fn arb_column_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Generate a value map.
    pub fn arb_value_map() -> impl Strategy<Value = ValueMap> {
        prop::collection::hash_map(arb_column_name(), arb_value(), 0..8)
    }

    /// Generate a record id in the hyphen-free hex form.
    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "[0-9a-f]{32}"
    }

    /// Generate a logical table name.
    pub fn arb_table_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_]{0,23}"
    }

    /// Generate a timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = TimestampMs> {
        1_577_836_800_000i64..1_893_456_000_000i64
    }

    /// Generate a record for the given tenant and table.
    pub fn arb_record(
        tenant_id: TenantId,
        table_name: impl Into<String>,
    ) -> impl Strategy<Value = Record> {
        let table_name = table_name.into();
        (arb_record_id(), arb_value_map(), arb_timestamp()).prop_map(move |(id, values, ts)| {
            Record::new(id, tenant_id, table_name.clone(), values, ts)
        })
    }

    /// Generate a batch of records with distinct ids.
    pub fn arb_records(
        tenant_id: TenantId,
        table_name: impl Into<String>,
        max: usize,
    ) -> impl Strategy<Value = Vec<Record>> {
        let table_name = table_name.into();
        prop::collection::hash_map(arb_record_id(), (arb_value_map(), arb_timestamp()), 0..max)
            .prop_map(move |by_id| {
                by_id
                    .into_iter()
                    .map(|(id, (values, ts))| {
                        Record::new(id, tenant_id, table_name.clone(), values, ts)
                    })
                    .collect()
            })
    }

    /// Generate a paging window.
    pub fn arb_paging() -> impl Strategy<Value = Paging> {
        (0u32..50, prop::option::of(0u32..50)).prop_map(|(from, count)| Paging::new(from, count))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores, template sets and records for common test scenarios.

    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// Partition count used by fixture stores.
    pub const TEST_PARTITION_COUNT: u32 = 16;

    pub type TestPool = InstrumentedPool<SqlitePool>;

    /// A record store over a throwaway SQLite file.
    pub struct TempStore {
        pub store: RdbmsRecordStore<TestPool>,
        _dir: TempDir,
    }

    impl TempStore {
        pub fn pool(&self) -> &TestPool {
            self.store.pool()
        }
    }

    /// Open an instrumented SQLite pool inside `dir`.
    pub fn sqlite_pool(dir: &Path) -> TestPool {
        let pool = SqliteConfig::new(dir.join("strata-test.db"))
            .create_pool()
            .expect("open SQLite pool");
        InstrumentedPool::new(pool)
    }

    /// A store using the built-in SQLite dialect.
    pub fn temp_store() -> TempStore {
        temp_store_with(dialect::sqlite(), TEST_PARTITION_COUNT)
    }

    /// A store using `templates` and `partition_count`.
    pub fn temp_store_with(templates: QueryTemplateSet, partition_count: u32) -> TempStore {
        init_test_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let pool = Arc::new(sqlite_pool(dir.path()));
        let store = RdbmsRecordStore::new(
            pool,
            templates,
            Arc::new(JsonRecordCodec),
            partition_count,
        )
        .expect("build store");
        TempStore { store, _dir: dir }
    }

    /// SQLite templates without a merge statement, forcing insert-or-update.
    pub fn insert_update_templates() -> QueryTemplateSet {
        let mut set = dialect::sqlite();
        set.name = "sqlite-insert-update".to_string();
        set.record_merge_query = None;
        set
    }

    fn row_number_query(window: &str) -> String {
        format!(
            "SELECT record_id, timestamp, data FROM (SELECT record_id, timestamp, data, \
             ROW_NUMBER() OVER (ORDER BY timestamp, record_id) AS rn FROM {{{{TABLE_NAME}}}} \
             WHERE partition_key >= ? AND partition_key < ? AND timestamp >= ? \
             AND timestamp < ?) AS paged WHERE {} ORDER BY rn",
            window
        )
    }

    /// SQLite templates paging with `rn <= upper AND rn > offset`.
    pub fn upper_first_templates() -> QueryTemplateSet {
        let mut set = dialect::sqlite();
        set.name = "sqlite-upper-first".to_string();
        set.record_retrieval_query = Some(row_number_query("rn <= ? AND rn > ?"));
        set.pagination_mode = PaginationMode::Mode2;
        set
    }

    /// SQLite templates paging with `rn > offset AND rn <= upper`.
    pub fn offset_first_templates() -> QueryTemplateSet {
        let mut set = dialect::sqlite();
        set.name = "sqlite-offset-first".to_string();
        set.record_retrieval_query = Some(row_number_query("rn > ? AND rn <= ?"));
        set.pagination_mode = PaginationMode::Mode3;
        set
    }

    /// Deterministic values for record number `n`.
    pub fn sample_values(n: i64) -> ValueMap {
        let mut values = ValueMap::new();
        values.insert("seq".to_string(), Value::Long(n));
        values.insert("label".to_string(), Value::String(format!("record-{}", n)));
        values.insert("even".to_string(), Value::Bool(n % 2 == 0));
        values
    }

    /// `count` records with ids `r000`.. and timestamps `base_ts + i`.
    pub fn sample_records(
        tenant_id: TenantId,
        table_name: &str,
        count: usize,
        base_ts: TimestampMs,
    ) -> Vec<Record> {
        (0..count)
            .map(|i| {
                let n = i as i64;
                Record::new(
                    format!("r{:03}", i),
                    tenant_id,
                    table_name,
                    sample_values(n),
                    base_ts + n,
                )
            })
            .collect()
    }

    /// Ids of `records`, in order.
    pub fn ids_of(records: &[Record]) -> Vec<String> {
        records.iter().map(|r| r.id().to_string()).collect()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for STRATA results and records.

    use super::*;

    /// Assert that a StrataResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &StrataResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_table_not_available<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::TableNotAvailable { .. }) => {}
            other => panic!("Expected TableNotAvailable, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_driver_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Storage(StorageError::Driver { .. })) => {}
            other => panic!("Expected Driver error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_connection_unavailable<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Storage(StorageError::ConnectionUnavailable { .. })) => {}
            other => panic!("Expected ConnectionUnavailable, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &StrataResult<T>) {
        match result {
            Err(StrataError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that two record sets hold the same records, ignoring order.
    #[track_caller]
    pub fn assert_same_records(actual: &[Record], expected: &[Record]) {
        let mut actual: Vec<&Record> = actual.iter().collect();
        let mut expected: Vec<&Record> = expected.iter().collect();
        actual.sort_by(|a, b| a.id().cmp(b.id()));
        expected.sort_by(|a, b| a.id().cmp(b.id()));
        assert_eq!(actual, expected, "record sets differ");
    }

    /// Assert that records come back in `(timestamp, id)` order.
    #[track_caller]
    pub fn assert_scan_order(records: &[Record]) {
        for pair in records.windows(2) {
            let a = (pair[0].timestamp(), pair[0].id());
            let b = (pair[1].timestamp(), pair[1].id());
            assert!(a <= b, "records out of order: {:?} before {:?}", a, b);
        }
    }

    /// Assert that every checked-out connection has been returned.
    #[track_caller]
    pub fn assert_no_leaks<P: SqlPool>(pool: &InstrumentedPool<P>) {
        assert_eq!(
            pool.live_connections(),
            0,
            "connections still checked out; last statements: {:?}",
            pool.statements().iter().rev().take(5).collect::<Vec<_>>()
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
