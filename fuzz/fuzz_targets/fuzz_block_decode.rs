#![no_main]
use libfuzzer_sys::fuzz_target;

use divachain::core::canonical;
use divachain::core::types::Block;

fuzz_target!(|data: &[u8]| {
    if let Ok(block) = serde_json::from_slice::<Block>(data) {
        let _ = canonical::block(&block);
        let _ = canonical::block_hash(&block);
    }
});
