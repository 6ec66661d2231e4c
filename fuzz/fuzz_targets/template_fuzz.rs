//! Fuzz test for query template set loading
//!
//! Feeds arbitrary text to the TOML loader and, when a set loads, resolves
//! every template against an arbitrary table name and id count.
//!
//! Run with: cargo +nightly fuzz run template_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_core::{QueryKind, QueryTemplateSet};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(set) = QueryTemplateSet::from_toml_str(input) else {
        return;
    };

    // A loaded set has passed validation, so every required template resolves.
    let table = input.lines().next().unwrap_or("t");
    for kind in QueryKind::ALL {
        if set.is_required(kind) {
            let sql = set.resolve(kind, 7, table).expect("required template resolves");
            assert!(!sql.contains("{{TABLE_NAME}}"));
        }
        if let Ok(sql) = set.resolve_with_id_count(kind, 7, table, data.len() % 64 + 1) {
            assert!(!sql.contains("{{RECORD_IDS}}"));
        }
    }
    for sql in set.init_queries(7, table).into_iter().chain(set.delete_queries(7, table)) {
        assert!(!sql.contains("{{TABLE_NAME}}"));
    }
});
