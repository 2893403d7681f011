#![no_main]

use libfuzzer_sys::fuzz_target;
use certbundle_lib::parse_private_key_pem;

fuzz_target!(|data: &[u8]| {
    // Key parsing walks raw DER; it must reject garbage without panicking.
    let _ = parse_private_key_pem(data);
});
