#![no_main]

use cardlock_core::FileCardStore;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let contents = String::from_utf8_lossy(data);

    // Malformed rows are skipped, never fatal
    for record in FileCardStore::parse_table(&contents) {
        assert!(!record.card_id.as_str().is_empty());
    }
});
