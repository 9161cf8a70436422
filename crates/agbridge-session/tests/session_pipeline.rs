use std::fs;

use agbridge_ai::{Message, MessageRole};
use agbridge_session::{
    ContextBuilder, FormatVersion, SessionDiscovery, SessionParser, REDACTED_PLACEHOLDER,
};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn integration_discovered_sessions_parse_and_inject() {
    let root = tempdir().expect("tempdir");
    fs::write(
        root.path().join("legacy.json"),
        json!({
            "sessionId": "legacy",
            "goal": "Port the importer",
            "plan": [{"step": 1, "action": "read old code"}, {"step": 2, "action": "rewrite"}],
            "completed": [1],
            "files": ["importer.rs"],
            "vars": {"github_token": "ghp_secret"}
        })
        .to_string(),
    )
    .expect("write legacy");
    fs::create_dir_all(root.path().join("broken")).expect("mkdir");
    fs::write(root.path().join("broken").join("session.json"), "{not json").expect("write broken");

    let discovery = SessionDiscovery::with_roots(vec![root.path().to_path_buf()]);
    let sessions = discovery.discover();
    assert_eq!(sessions.len(), 2);

    let parser = SessionParser::new();
    let broken = discovery.by_id("broken").expect("broken session listed");
    let parsed_broken = parser.parse(&broken.path).expect("parse broken");
    assert!(parsed_broken.partial);
    assert_eq!(parsed_broken.version, FormatVersion::Unparsable);
    assert_eq!(parsed_broken.id, "broken");

    let legacy = discovery.by_id("legacy").expect("legacy session listed");
    let parsed = parser.parse(&legacy.path).expect("parse legacy");
    assert_eq!(parsed.version, FormatVersion::V1);

    let messages = ContextBuilder::default().inject(&[Message::user("keep going")], &parsed);
    assert_eq!(messages[0].role, MessageRole::System);
    let context = messages[0].text_content();
    assert!(context.contains("Port the importer"));
    assert!(context.contains("- [1] read old code"));
    assert!(context.contains("- [2] rewrite (pending)"));
    assert!(context.contains(REDACTED_PLACEHOLDER));
    assert!(!context.contains("ghp_secret"));
    assert_eq!(messages[1].text_content(), "keep going");
}
