#![no_main]

use agbridge_ai::StreamTranslator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut translator = StreamTranslator::new();
    let mut events = Vec::new();
    // Feed in uneven slices so record and UTF-8 boundaries land mid-chunk.
    for chunk in data.chunks(7) {
        events.extend(translator.push(chunk));
    }
    events.extend(translator.finish());

    let terminals = events.iter().filter(|event| event.is_terminal()).count();
    assert_eq!(terminals, 1);
    assert!(events.last().is_some_and(|event| event.is_terminal()));
    assert!(translator.is_finished());
});
