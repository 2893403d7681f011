#![no_main]

use libfuzzer_sys::fuzz_target;
use certbundle_lib::parse_certificate;

fuzz_target!(|data: &[u8]| {
    // The parser must never panic, regardless of input.
    if let Ok(cert) = parse_certificate(data) {
        // If parsing succeeds, exercise the derived accessors.
        let _ = cert.to_pem();
        let _ = cert.matches_hostname("example.com");
        let _ = cert.matches_hostname("192.0.2.1");
    }
});
