//! Pagination modes and paging windows.
//!
//! Each SQL dialect expresses "skip N rows, return M rows" differently. The
//! retrieval template always takes two numeric pagination parameters; the
//! dialect's [`PaginationMode`] decides what those two numbers are.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row count used when a scan asks for "all records".
///
/// Bound as a 32-bit value so every supported engine accepts it as a limit.
pub const UNBOUNDED_RECORDS_COUNT: i64 = i32::MAX as i64;

/// How `(records_from, records_count)` maps onto the two bound parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PaginationMode {
    /// `(offset, limit)`: MySQL, H2, SQLite, PostgreSQL `OFFSET ? LIMIT ?`.
    Mode1,
    /// `(offset + limit, offset)`: inclusive row-number upper bound first
    /// (Oracle `ROWNUM`).
    Mode2,
    /// `(offset, offset + limit)`: symmetric row-number window
    /// (`ROW_NUMBER() ... WHERE rn > ? AND rn <= ?`).
    Mode3,
}

impl PaginationMode {
    /// Translate a paging window into the two retrieval parameters.
    pub fn translate(self, records_from: i64, records_count: i64) -> (i64, i64) {
        match self {
            PaginationMode::Mode1 => (records_from, records_count),
            PaginationMode::Mode2 => (records_from.saturating_add(records_count), records_from),
            PaginationMode::Mode3 => (records_from, records_from.saturating_add(records_count)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaginationMode::Mode1 => "MODE1",
            PaginationMode::Mode2 => "MODE2",
            PaginationMode::Mode3 => "MODE3",
        }
    }
}

impl fmt::Display for PaginationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaginationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MODE1" => Ok(PaginationMode::Mode1),
            "MODE2" => Ok(PaginationMode::Mode2),
            "MODE3" => Ok(PaginationMode::Mode3),
            _ => Err(ConfigError::InvalidValue {
                field: "pagination_mode".to_string(),
                value: s.to_string(),
                reason: "expected one of MODE1, MODE2, MODE3".to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PaginationMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PaginationMode> for String {
    fn from(mode: PaginationMode) -> Self {
        mode.as_str().to_string()
    }
}

/// A paging window over a ranged scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Paging {
    /// Rows to skip.
    pub records_from: u32,
    /// Rows to return; `None` returns everything.
    pub records_count: Option<u32>,
}

impl Paging {
    /// All records, no offset.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(records_from: u32, records_count: Option<u32>) -> Self {
        Self {
            records_from,
            records_count,
        }
    }

    /// The row count bound into queries, with "unbounded" made concrete.
    pub fn effective_count(&self) -> i64 {
        match self.records_count {
            Some(count) => i64::from(count).min(UNBOUNDED_RECORDS_COUNT),
            None => UNBOUNDED_RECORDS_COUNT,
        }
    }

    /// Whether the window restricts the result (non-zero offset or bounded count).
    pub fn is_paged(&self) -> bool {
        self.records_from > 0 || self.effective_count() < UNBOUNDED_RECORDS_COUNT
    }

    /// Parameters for the given mode.
    pub fn parameters(&self, mode: PaginationMode) -> (i64, i64) {
        mode.translate(i64::from(self.records_from), self.effective_count())
    }
}
