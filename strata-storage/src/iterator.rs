//! Streaming record iterator.
//!
//! A `RecordIterator` owns at most one open cursor, and through it one pooled
//! connection. Rows are decoded one at a time. The cursor is released as soon
//! as the result is exhausted, the iterator is closed, or a fetch fails.
//!
//! ```text
//! Idle -> Fetching -> HasBuffered -> Idle ...
//!                  -> Exhausted
//!                  -> Closed (error)
//! any  -> Closed   (close)
//! ```

use crate::reader::{Cursor, IdBatches};
use crate::sql::{RowCursor, SqlPool, SqlRow};
use futures_util::stream::{self, Stream};
use std::collections::HashSet;
use std::sync::Arc;
use strata_core::{Record, RecordCodec, StrataResult, TenantId, ValueMap};

const OPERATION: &str = "reading records";

/// Lifecycle state of a [`RecordIterator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Nothing buffered; the next call fetches.
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// One decoded record is waiting to be consumed.
    HasBuffered,
    /// The result is exhausted and resources are released.
    Exhausted,
    /// Closed by the caller or by an error; resources are released.
    Closed,
}

/// Forward-only, single-pass sequence of records.
pub struct RecordIterator<P: SqlPool> {
    state: IteratorState,
    cursor: Option<Cursor<P>>,
    batches: Option<IdBatches<P>>,
    buffered: Option<Record>,
    tenant_id: TenantId,
    table_name: String,
    columns: Option<HashSet<String>>,
    codec: Arc<dyn RecordCodec>,
}

impl<P: SqlPool> RecordIterator<P> {
    pub(crate) fn new(
        tenant_id: TenantId,
        table_name: impl Into<String>,
        columns: Option<HashSet<String>>,
        codec: Arc<dyn RecordCodec>,
        cursor: Option<Cursor<P>>,
        batches: Option<IdBatches<P>>,
    ) -> Self {
        Self {
            state: IteratorState::Idle,
            cursor,
            batches,
            buffered: None,
            tenant_id,
            table_name: table_name.into(),
            columns,
            codec,
        }
    }

    /// An iterator over nothing. Holds no connection.
    pub(crate) fn empty(
        tenant_id: TenantId,
        table_name: impl Into<String>,
        codec: Arc<dyn RecordCodec>,
    ) -> Self {
        Self::new(tenant_id, table_name, None, codec, None, None)
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Whether the iterator still owns a cursor or pending id batches.
    pub fn holds_resources(&self) -> bool {
        self.cursor.is_some() || self.batches.is_some()
    }

    /// Whether another record is available, fetching one if needed.
    ///
    /// A fetch or decode failure closes the iterator and is returned; later
    /// calls report `false`.
    pub async fn has_next(&mut self) -> StrataResult<bool> {
        match self.state {
            IteratorState::HasBuffered => return Ok(true),
            IteratorState::Exhausted | IteratorState::Closed => return Ok(false),
            IteratorState::Idle | IteratorState::Fetching => {}
        }

        self.state = IteratorState::Fetching;
        match self.fetch().await {
            Ok(Some(record)) => {
                self.buffered = Some(record);
                self.state = IteratorState::HasBuffered;
                Ok(true)
            }
            Ok(None) => {
                self.release();
                self.state = IteratorState::Exhausted;
                Ok(false)
            }
            Err(e) => {
                self.release();
                self.state = IteratorState::Closed;
                tracing::debug!(
                    tenant_id = self.tenant_id,
                    table = %self.table_name,
                    error = %e,
                    "Record iterator closed on error"
                );
                Err(e)
            }
        }
    }

    /// Consume the next record, or `None` once the sequence has ended.
    pub async fn next_record(&mut self) -> StrataResult<Option<Record>> {
        if !self.has_next().await? {
            return Ok(None);
        }
        self.state = IteratorState::Idle;
        Ok(self.buffered.take())
    }

    /// Drain the remaining records.
    pub async fn collect_records(mut self) -> StrataResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Release the cursor and connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.release();
        self.buffered = None;
        self.state = IteratorState::Closed;
    }

    /// Adapt into a stream. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = StrataResult<Record>> + Send {
        stream::unfold(self, |mut iter| async move {
            match iter.next_record().await {
                Ok(Some(record)) => Some((Ok(record), iter)),
                Ok(None) => None,
                Err(e) => Some((Err(e), iter)),
            }
        })
    }

    async fn fetch(&mut self) -> StrataResult<Option<Record>> {
        loop {
            if let Some(cursor) = self.cursor.as_mut() {
                match cursor.next_row().await {
                    Ok(Some(row)) => return self.decode(row).map(Some),
                    Ok(None) => self.cursor = None,
                    Err(e) => return Err(e.into_storage(OPERATION)),
                }
            }
            let Some(batches) = self.batches.as_mut() else {
                return Ok(None);
            };
            match batches.open_next().await? {
                Some(cursor) => self.cursor = Some(cursor),
                None => self.batches = None,
            }
        }
    }

    /// Columns: 0 = record id, 1 = timestamp, 2 = value blob.
    fn decode(&self, row: SqlRow) -> StrataResult<Record> {
        let id = row.get_text(0).map_err(|e| e.into_storage(OPERATION))?;
        let timestamp = row.get_i64(1).map_err(|e| e.into_storage(OPERATION))?;
        let values = match row.get_blob(2).map_err(|e| e.into_storage(OPERATION))? {
            Some(bytes) => self.codec.decode(bytes, self.columns.as_ref())?,
            None => ValueMap::new(),
        };
        Ok(Record::new(
            id,
            self.tenant_id,
            self.table_name.clone(),
            values,
            timestamp,
        ))
    }

    fn release(&mut self) {
        self.cursor = None;
        self.batches = None;
    }
}

impl<P: SqlPool> Drop for RecordIterator<P> {
    fn drop(&mut self) {
        if self.holds_resources() {
            tracing::warn!(
                tenant_id = self.tenant_id,
                table = %self.table_name,
                state = ?self.state,
                "Record iterator dropped while holding a connection; releasing it"
            );
            self.release();
        }
    }
}

impl<P: SqlPool> std::fmt::Debug for RecordIterator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordIterator")
            .field("state", &self.state)
            .field("tenant_id", &self.tenant_id)
            .field("table_name", &self.table_name)
            .field("holds_resources", &self.holds_resources())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{DriverError, FetchOptions, SqlConnection, SqlParam, SqlValue};
    use ::async_trait::async_trait;
    use futures_util::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_core::{JsonRecordCodec, Value};

    /// Counts cursors alive.
    struct Live(Arc<AtomicUsize>);

    impl Drop for Live {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct ScriptPool;
    struct ScriptConnection;

    struct ScriptCursor {
        rows: VecDeque<Result<SqlRow, DriverError>>,
        _live: Live,
    }

    #[async_trait]
    impl SqlPool for ScriptPool {
        type Connection = ScriptConnection;

        async fn acquire(&self) -> Result<ScriptConnection, DriverError> {
            Ok(ScriptConnection)
        }

        fn product_name(&self) -> &str {
            "script"
        }
    }

    #[async_trait]
    impl SqlConnection for ScriptConnection {
        type Cursor = ScriptCursor;

        async fn begin(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn execute(&mut self, _sql: &str, _params: &[SqlParam]) -> Result<u64, DriverError> {
            Ok(0)
        }

        async fn query_rows(
            &mut self,
            _sql: &str,
            _params: &[SqlParam],
        ) -> Result<Vec<SqlRow>, DriverError> {
            Ok(Vec::new())
        }

        async fn open_cursor(
            self,
            _sql: &str,
            _params: &[SqlParam],
            _options: FetchOptions,
        ) -> Result<ScriptCursor, DriverError> {
            Err(DriverError::new("scripted connections cannot query"))
        }
    }

    #[async_trait]
    impl RowCursor for ScriptCursor {
        async fn next_row(&mut self) -> Result<Option<SqlRow>, DriverError> {
            self.rows.pop_front().transpose()
        }
    }

    fn row(id: &str, ts: i64, data: Option<&[u8]>) -> SqlRow {
        SqlRow::new(vec![
            SqlValue::Text(id.to_string()),
            SqlValue::Int(ts),
            data.map_or(SqlValue::Null, |d| SqlValue::Blob(d.to_vec())),
        ])
    }

    fn encoded(column: &str, value: i32) -> Vec<u8> {
        let mut values = ValueMap::new();
        values.insert(column.to_string(), Value::Int(value));
        JsonRecordCodec.encode(&values).expect("encode")
    }

    fn iterator(
        rows: Vec<Result<SqlRow, DriverError>>,
        live: &Arc<AtomicUsize>,
    ) -> RecordIterator<ScriptPool> {
        live.fetch_add(1, Ordering::SeqCst);
        let cursor = ScriptCursor {
            rows: rows.into(),
            _live: Live(Arc::clone(live)),
        };
        RecordIterator::new(7, "events", None, Arc::new(JsonRecordCodec), Some(cursor), None)
    }

    #[tokio::test]
    async fn test_iterates_and_releases_on_exhaustion() {
        let live = Arc::new(AtomicUsize::new(0));
        let blob = encoded("n", 5);
        let mut iter = iterator(
            vec![Ok(row("a", 1, Some(blob.as_slice()))), Ok(row("b", 2, None))],
            &live,
        );

        assert_eq!(iter.state(), IteratorState::Idle);
        assert!(iter.has_next().await.expect("has_next"));
        assert!(iter.has_next().await.expect("has_next is idempotent"));
        assert_eq!(iter.state(), IteratorState::HasBuffered);

        let first = iter.next_record().await.expect("next").expect("record");
        assert_eq!(first.id(), "a");
        assert_eq!(first.tenant_id(), 7);
        assert_eq!(first.value("n"), Some(&Value::Int(5)));

        let second = iter.next_record().await.expect("next").expect("record");
        assert!(second.values().is_empty());

        assert!(!iter.has_next().await.expect("has_next"));
        assert_eq!(iter.state(), IteratorState::Exhausted);
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(!iter.holds_resources());

        iter.close();
        iter.close();
        assert_eq!(iter.state(), IteratorState::Closed);
        assert!(iter.next_record().await.expect("closed").is_none());
    }

    #[tokio::test]
    async fn test_cursor_error_closes_iterator() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut iter = iterator(
            vec![Ok(row("a", 1, None)), Err(DriverError::new("connection reset"))],
            &live,
        );

        assert!(iter.next_record().await.expect("first").is_some());
        assert!(iter.next_record().await.is_err());
        assert_eq!(iter.state(), IteratorState::Closed);
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(!iter.has_next().await.expect("never resumes"));
    }

    #[tokio::test]
    async fn test_decode_error_closes_iterator() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut iter = iterator(vec![Ok(row("a", 1, Some(&b"not json"[..])))], &live);

        let err = iter.has_next().await.unwrap_err();
        assert!(matches!(err, strata_core::StrataError::Codec(_)));
        assert_eq!(iter.state(), IteratorState::Closed);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_early_close_releases_cursor() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut iter = iterator(vec![Ok(row("a", 1, None)), Ok(row("b", 2, None))], &live);

        assert!(iter.has_next().await.expect("has_next"));
        iter.close();
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(!iter.has_next().await.expect("closed"));
    }

    #[tokio::test]
    async fn test_drop_releases_cursor() {
        let live = Arc::new(AtomicUsize::new(0));
        let iter = iterator(vec![Ok(row("a", 1, None))], &live);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        drop(iter);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_iterator_holds_nothing() {
        let mut iter: RecordIterator<ScriptPool> =
            RecordIterator::empty(1, "t", Arc::new(JsonRecordCodec));
        assert!(!iter.holds_resources());
        assert!(!iter.has_next().await.expect("has_next"));
        assert_eq!(iter.state(), IteratorState::Exhausted);
    }

    #[tokio::test]
    async fn test_stream_adapter() {
        let live = Arc::new(AtomicUsize::new(0));
        let iter = iterator(
            vec![Ok(row("a", 1, None)), Ok(row("b", 2, None)), Ok(row("c", 3, None))],
            &live,
        );
        let ids: Vec<String> = iter
            .into_stream()
            .map(|r| r.map(|rec| rec.id().to_string()))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<StrataResult<_>>()
            .expect("all records");
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
