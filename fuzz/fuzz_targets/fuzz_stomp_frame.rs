#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Push frames arrive as text; anything else never reaches the decoder.
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(frames) = reversi_client::stomp::decode(text) {
        for frame in &frames {
            let _ = frame.header("subscription");
            let _ = frame.encode();
        }
    }
});
