use std::{fs, sync::Arc};

use agbridge_ai::{
    GeminiClient, GeminiConfig, GenerateRequest, Message, StreamDelta, StreamEvent, ToolDefinition,
};
use agbridge_core::current_unix_timestamp;
use agbridge_provider::{
    AuthState, CredentialStore, KeySource, KeySourcePreference, OAuthConfig, OAuthCredentials,
    OAuthFlow,
};
use agbridge_session::{ContextBuilder, SessionDiscovery, SessionParser};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use tokio_stream::StreamExt;

fn write_session(root: &TempDir) {
    let session_dir = root.path().join("demo");
    fs::create_dir_all(&session_dir).expect("session dir");
    fs::write(
        session_dir.join("session.json"),
        json!({
            "schemaVersion": "2.1",
            "sessionId": "demo",
            "task": {
                "goal": "Add pagination to the orders endpoint",
                "steps": [
                    {"index": 1, "action": "read handler", "status": "completed"},
                    {"index": 2, "action": "add cursor param", "status": "executing"}
                ]
            },
            "workspace": {"modifiedFiles": ["src/orders.rs"]},
            "variables": {"stripe_api_key": "sk_live_123", "page_size": 50}
        })
        .to_string(),
    )
    .expect("write session");
}

#[tokio::test]
async fn integration_resumed_session_reaches_model_and_streams_back() {
    let sessions = TempDir::new().expect("sessions");
    write_session(&sessions);
    let config_dir = TempDir::new().expect("config");
    let server = MockServer::start();

    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/token")
            .body_includes("grant_type=refresh_token");
        then.status(200)
            .json_body(json!({"access_token": "ya29.refreshed", "expires_in": 3600}));
    });
    let generate = server.mock(|when, then| {
        when.method(POST)
            .path("/v1beta/models/gemini-test:streamGenerateContent")
            .query_param("alt", "sse")
            .header("authorization", "Bearer ya29.refreshed")
            .body_includes("# Resumed session demo")
            .body_includes("[REDACTED]")
            .body_includes("agb__read_file");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Resuming at step 2.\"}]}}]}\n\n",
                "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"functionCall\":{\"name\":\"agb__read_file\",\"args\":{\"path\":\"src/orders.rs\"}}}]},\"finishReason\":\"STOP\"}]}\n\n",
                "data: [DONE]\n\n",
            ));
    });

    // Credentials close to expiry force a refresh before the model call.
    let key_source =
        KeySource::new(config_dir.path(), KeySourcePreference::Derived).with_iterations(10);
    let store = Arc::new(CredentialStore::with_key_source(
        config_dir.path(),
        key_source,
    ));
    let stale = OAuthCredentials {
        access_token: "ya29.stale".to_string(),
        refresh_token: Some("1//keep".to_string()),
        expires_unix: current_unix_timestamp() + 60,
        email: "dev@example.com".to_string(),
    };
    store.store(&stale.email, &stale).expect("seed credentials");
    store.set_active_account(&stale.email).expect("active");

    let mut oauth = OAuthConfig::new("client-123");
    oauth.token_endpoint = server.url("/token");
    let flow = OAuthFlow::new(oauth, store.clone()).expect("flow");
    let account = store.active_account().expect("active account");
    let loaded = store.load(&account).expect("credentials decrypt");
    let credentials = flow.ensure_valid(&loaded).await.expect("refresh");
    refresh.assert();
    assert_eq!(flow.state(), AuthState::Authenticated);
    assert_eq!(credentials.refresh_token.as_deref(), Some("1//keep"));

    let discovery = SessionDiscovery::with_roots(vec![sessions.path().to_path_buf()]);
    let latest = discovery.latest().expect("session discovered");
    assert_eq!(latest.id, "demo");
    let parsed = SessionParser::new().parse(&latest.path).expect("parse");
    let messages =
        ContextBuilder::default().inject(&[Message::user("pick up where I left off")], &parsed);

    let mut request = GenerateRequest::new("gemini-test", messages);
    request.tools.push(ToolDefinition {
        name: "read_file".to_string(),
        description: "Read a workspace file".to_string(),
        parameters: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
    });
    let client = GeminiClient::new(GeminiConfig {
        api_base: server.url("/v1beta"),
        max_retries: 0,
        ..GeminiConfig::default()
    })
    .expect("client");

    let events: Vec<StreamEvent> = client
        .stream_generate(&request, &credentials.access_token)
        .await
        .expect("stream")
        .collect()
        .await;
    generate.assert();

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::text("Resuming at step 2."));
    match &events[1] {
        StreamEvent::ContentBlockDelta {
            delta: StreamDelta::ToolUse { name, input, .. },
            ..
        } => {
            assert_eq!(name, "read_file");
            assert_eq!(input, &json!({"path": "src/orders.rs"}));
        }
        other => panic!("expected tool use delta, got {other:?}"),
    }
    assert_eq!(events[2].event_name(), "message_stop");
}

#[tokio::test]
async fn integration_unreadable_credentials_and_broken_session_degrade() {
    let sessions = TempDir::new().expect("sessions");
    fs::write(sessions.path().join("half.json"), b"{\"goal\": \"trunc").expect("write");
    let discovery = SessionDiscovery::with_roots(vec![sessions.path().to_path_buf()]);
    let latest = discovery.latest().expect("listed");
    let parsed = SessionParser::new().parse(&latest.path).expect("recovers");
    assert!(parsed.partial);
    let context = ContextBuilder::default().build(&parsed);
    assert!(context.starts_with("# Resumed session half"));

    let config_dir = TempDir::new().expect("config");
    let store = CredentialStore::with_key_source(
        config_dir.path(),
        KeySource::new(config_dir.path(), KeySourcePreference::Derived).with_iterations(10),
    );
    fs::create_dir_all(store.credentials_dir()).expect("mkdir");
    fs::write(store.credential_path("dev@example.com"), b"not a blob").expect("write");
    assert_eq!(store.load("dev@example.com"), None);
}
