#![no_main]
use libfuzzer_sys::fuzz_target;

use divachain::core::canonical;
use divachain::core::types::Envelope;

fuzz_target!(|data: &[u8]| {
    // The wire decode path must not panic, and anything that decodes must
    // re-encode canonically without panicking either.
    if let Ok(env) = serde_json::from_slice::<Envelope>(data) {
        let _ = canonical::envelope(&env);
        let _ = canonical::envelope_signing_bytes(
            &env.ident,
            env.seq,
            env.origin.as_str(),
            &env.dest,
            &env.data,
        );
    }
});
