#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_oplog::RankKey;

// Drives a sibling list of keys through inserts at fuzzer-chosen gaps and
// checks that every new key lands strictly inside its gap.
fuzz_target!(|data: &[u8]| {
    let mut keys: Vec<RankKey> = Vec::new();
    for &byte in data.iter().take(512) {
        let gap = usize::from(byte) % (keys.len() + 1);
        let prev = gap.checked_sub(1).map(|i| &keys[i]);
        let next = keys.get(gap);
        let key = RankKey::for_gap(prev, next).expect("neighbours are ordered");
        if let Some(prev) = prev {
            assert!(prev < &key);
        }
        if let Some(next) = next {
            assert!(&key < next);
        }
        assert!(!key.as_str().ends_with('0'));
        assert_eq!(RankKey::parse(key.as_str()).as_ref(), Ok(&key));
        keys.insert(gap, key);
    }
});
