#![no_main]

use b3_ride_tracker::decoder::EventDecoder;
use b3_ride_tracker::reducer::RideState;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Frames arrive as text; non-UTF-8 input never reaches the decoder.
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Whatever decodes must also fold into the state without panicking.
    if let Ok(event) = EventDecoder::new().decode(raw) {
        let mut state = RideState::new();
        state.apply(&event);
        state.apply(&event);
    }
});
