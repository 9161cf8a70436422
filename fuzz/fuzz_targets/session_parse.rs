#![no_main]

use agbridge_session::{ContextBuilder, FormatVersion, SessionParser};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parsed = SessionParser::new().parse_bytes(data, "fuzz");
    if parsed.version == FormatVersion::Unparsable {
        assert!(parsed.partial);
    }
    for reference in &parsed.completed {
        assert!(parsed.plan_steps.iter().any(|step| step.index == *reference));
    }
    let builder = ContextBuilder::default();
    assert_eq!(builder.build(&parsed), builder.build(&parsed));
});
