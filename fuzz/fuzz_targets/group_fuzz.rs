//! Fuzz test for record group and value decoding
//!
//! Groups and value blobs cross process boundaries, so both decoders must
//! reject malformed input without panicking.
//!
//! Run with: cargo +nightly fuzz run group_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_core::{JsonRecordCodec, RecordCodec, RecordGroup};

fuzz_target!(|data: &[u8]| {
    if let Ok(values) = JsonRecordCodec.decode(data, None) {
        let bytes = JsonRecordCodec.encode(&values).expect("decoded values re-encode");
        let again = JsonRecordCodec.decode(&bytes, None).expect("re-encoded values decode");
        assert_eq!(again.len(), values.len());
    }

    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(group) = RecordGroup::from_json(json) {
        let shipped = group.to_json().expect("decoded group re-encodes");
        let back = RecordGroup::from_json(&shipped).expect("re-encoded group decodes");
        assert_eq!(back, group);
    }
});
