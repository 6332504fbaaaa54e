#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_oplog::{Operation, TreeState, replay};

fuzz_target!(|data: &[u8]| {
    if let Ok(ops) = serde_json::from_slice::<Vec<Operation>>(data) {
        let (state, report) = replay(TreeState::default(), &ops);
        let accounted = report.applied
            + report.unchanged
            + report.superseded
            + report.already_applied
            + report.skipped.len();
        assert_eq!(accounted, ops.len());
        // Every live or tombstoned node stays reachable from the root.
        assert_eq!(state.outline_all().len(), state.len());
    }
});
