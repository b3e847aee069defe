#![no_main]

use cardlock_core::LockoutRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);

    // Try to parse - should not panic
    if let Ok(record) = LockoutRecord::parse_line(&line) {
        // Anything accepted must be valid and re-encode to the same record
        assert!(record.validate().is_ok());

        let encoded = record.to_line();
        let reparsed = LockoutRecord::parse_line(&encoded).expect("re-encoded line must parse");
        assert_eq!(record, reparsed);
    }
});
