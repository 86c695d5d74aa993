#![no_main]

use custody_core::TransferBatch;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parse batch - should not panic
    if let Ok(batch) = TransferBatch::decode(data) {
        // Encoding is canonical, so a parsed batch re-encodes to the input
        let reencoded = batch.encode();
        assert_eq!(reencoded.as_slice(), data);
        assert_eq!(TransferBatch::decode(&reencoded).unwrap(), batch);
    }
});
