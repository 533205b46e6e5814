#![no_main]
use emproto::protocol::{DecodeOptions, P51Guard, decode_packet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Both guard variants must reject bad input without panicking
    for p51_guard in [P51Guard::Strict, P51Guard::Legacy] {
        let options = DecodeOptions { p51_guard };
        for datagram in decode_packet(data, &options).into_iter().flatten() {
            let _ = datagram.encode();
            let _ = datagram.payload.name();
        }
    }
});
