//! Record groups: serializable descriptors of a single scan unit.
//!
//! A record group is produced by planning (`get_by_ids` / `get_range`) and
//! later resolved into a record iterator, possibly by another process. Groups
//! are immutable value objects and round-trip through JSON.

use crate::{CodecError, Paging, ShardRange, StrataResult, TenantId, TimestampMs, ValidationError};
use serde::{Deserialize, Serialize};

/// Parameters of a ranged scan: a half-open time window plus paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeScan {
    /// Inclusive lower timestamp bound.
    pub time_from: TimestampMs,
    /// Exclusive upper timestamp bound.
    pub time_to: TimestampMs,
    pub paging: Paging,
}

impl RangeScan {
    /// Every record with `time_from <= timestamp < time_to`.
    pub fn new(time_from: TimestampMs, time_to: TimestampMs) -> Self {
        Self {
            time_from,
            time_to,
            paging: Paging::unbounded(),
        }
    }

    /// The whole timeline.
    pub fn all() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    pub fn with_paging(mut self, records_from: u32, records_count: Option<u32>) -> Self {
        self.paging = Paging::new(records_from, records_count);
        self
    }
}

/// A scan over a partition range and time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRecordGroup {
    tenant_id: TenantId,
    table_name: String,
    columns: Option<Vec<String>>,
    scan: RangeScan,
    shards: ShardRange,
}

impl RangeRecordGroup {
    /// Build a range group. The shard range must be non-empty.
    pub fn new(
        tenant_id: TenantId,
        table_name: impl Into<String>,
        columns: Option<Vec<String>>,
        scan: RangeScan,
        shards: ShardRange,
    ) -> StrataResult<Self> {
        if shards.start >= shards.end {
            return Err(ValidationError::InvalidValue {
                field: "shards".to_string(),
                reason: format!("empty shard range [{}, {})", shards.start, shards.end),
            }
            .into());
        }
        Ok(Self {
            tenant_id,
            table_name: table_name.into(),
            columns,
            scan,
            shards,
        })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn scan(&self) -> &RangeScan {
        &self.scan
    }

    pub fn time_from(&self) -> TimestampMs {
        self.scan.time_from
    }

    pub fn time_to(&self) -> TimestampMs {
        self.scan.time_to
    }

    pub fn paging(&self) -> &Paging {
        &self.scan.paging
    }

    pub fn shards(&self) -> ShardRange {
        self.shards
    }
}

/// A point lookup over a list of record ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdsRecordGroup {
    tenant_id: TenantId,
    table_name: String,
    columns: Option<Vec<String>>,
    ids: Vec<String>,
}

impl IdsRecordGroup {
    /// Build an id group. The id list must not be empty.
    pub fn new(
        tenant_id: TenantId,
        table_name: impl Into<String>,
        columns: Option<Vec<String>>,
        ids: Vec<String>,
    ) -> StrataResult<Self> {
        if ids.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "ids".to_string(),
                reason: "an id group needs at least one id".to_string(),
            }
            .into());
        }
        Ok(Self {
            tenant_id,
            table_name: table_name.into(),
            columns,
            ids,
        })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// A unit of scan work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordGroup {
    Range(RangeRecordGroup),
    Ids(IdsRecordGroup),
}

impl RecordGroup {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            RecordGroup::Range(g) => g.tenant_id(),
            RecordGroup::Ids(g) => g.tenant_id(),
        }
    }

    pub fn table_name(&self) -> &str {
        match self {
            RecordGroup::Range(g) => g.table_name(),
            RecordGroup::Ids(g) => g.table_name(),
        }
    }

    /// Serialize the group for handing to a remote reader.
    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    /// Deserialize a group received from a planner.
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        serde_json::from_str(json).map_err(|e| CodecError::Decode {
            reason: e.to_string(),
        })
    }
}

impl From<RangeRecordGroup> for RecordGroup {
    fn from(group: RangeRecordGroup) -> Self {
        RecordGroup::Range(group)
    }
}

impl From<IdsRecordGroup> for RecordGroup {
    fn from(group: IdsRecordGroup) -> Self {
        RecordGroup::Ids(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StrataError;

    #[test]
    fn test_ids_group_rejects_empty() {
        let err = IdsRecordGroup::new(1, "t", None, vec![]).unwrap_err();
        assert!(matches!(err, StrataError::Validation(_)));
    }

    #[test]
    fn test_planned_ids_group_allows_empty() {
        let group = IdsRecordGroup::planned(1, "t", None, vec![]);
        assert!(group.ids().is_empty());
        let json = RecordGroup::from(group.clone()).to_json().expect("serialize");
        let back = RecordGroup::from_json(&json).expect("deserialize");
        assert_eq!(back, RecordGroup::Ids(group));
    }

    #[test]
    fn test_range_group_rejects_empty_shards() {
        let err = RangeRecordGroup::new(1, "t", None, RangeScan::all(), ShardRange::new(3, 3))
            .unwrap_err();
        assert!(matches!(err, StrataError::Validation(_)));
    }

    #[test]
    fn test_group_json_roundtrip_for_remote_reader() {
        let range: RecordGroup = RangeRecordGroup::new(
            3,
            "logs",
            Some(vec!["level".to_string()]),
            RangeScan::new(10, 20).with_paging(5, Some(7)),
            ShardRange::new(0, 50),
        )
        .expect("valid group")
        .into();

        let json = range.to_json().expect("serialize");
        assert!(json.contains(r#""kind":"range""#));
        let back = RecordGroup::from_json(&json).expect("deserialize");
        assert_eq!(back, range);
        assert_eq!(back.tenant_id(), 3);
        assert_eq!(back.table_name(), "logs");
    }

    #[test]
    fn test_ids_group_json_tag() {
        let ids: RecordGroup = IdsRecordGroup::new(1, "t", None, vec!["a".to_string()])
            .expect("valid group")
            .into();
        let json = ids.to_json().expect("serialize");
        assert!(json.contains(r#""kind":"ids""#));
    }

    #[test]
    fn test_from_json_rejects_unknown_kind() {
        let err = RecordGroup::from_json(r#"{"kind":"hash"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }
}
