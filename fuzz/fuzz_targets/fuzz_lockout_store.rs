#![no_main]

use cardlock_core::{LockoutStore, MemoryLockoutPersistence};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let persistence = MemoryLockoutPersistence::with_bytes(data.to_vec());

    // Loading never fails, whatever the file holds
    let mut store = LockoutStore::new(Box::new(persistence.clone()));
    let report = store.load();
    assert!(report.unavailable.is_none());

    // A rewrite drops the corrupt lines and reloads cleanly
    if store.persist_all().is_ok() {
        let mut reopened = LockoutStore::new(Box::new(persistence));
        let report = reopened.load();
        assert!(report.corrupt_lines.is_empty());
        assert_eq!(reopened.records(), store.records());
    }
});
