#![no_main]

use custody_core::{recover, MessageHash};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() >= 32 {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&data[..32]);

        // Arbitrary signature bytes either recover an address or are
        // rejected as malformed - never a panic
        let _ = recover(&MessageHash::new(digest), &data[32..]);
    }
});
