//! Record value codec.
//!
//! The store treats value serialization as a black box: values go in as a
//! [`ValueMap`] and come back out of the database blob column through the same
//! codec. Decoding may be restricted to a column subset.

use crate::{CodecError, ValueMap};
use std::collections::HashSet;

/// Encodes and decodes record value maps to and from the blob column.
pub trait RecordCodec: Send + Sync {
    /// Encode a value map into bytes.
    fn encode(&self, values: &ValueMap) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into a value map.
    ///
    /// When `columns` is `Some`, only those columns are kept.
    fn decode(&self, bytes: &[u8], columns: Option<&HashSet<String>>)
        -> Result<ValueMap, CodecError>;
}

/// JSON codec using the adjacently tagged [`crate::Value`] representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordCodec;

impl RecordCodec for JsonRecordCodec {
    fn encode(&self, values: &ValueMap) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(values).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    fn decode(
        &self,
        bytes: &[u8],
        columns: Option<&HashSet<String>>,
    ) -> Result<ValueMap, CodecError> {
        let mut values: ValueMap = serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            reason: e.to_string(),
        })?;
        if let Some(columns) = columns {
            values.retain(|name, _| columns.contains(name));
        }
        Ok(values)
    }
}

/// Build the column filter used by decoders: `None` means "all columns".
pub fn column_filter(columns: Option<&[String]>) -> Option<HashSet<String>> {
    match columns {
        Some(cols) if !cols.is_empty() => Some(cols.iter().cloned().collect()),
        _ => None,
    }
}
