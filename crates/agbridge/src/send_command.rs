use std::io::{Read, Write};

use agbridge_ai::{BridgeAiError, GeminiClient, GenerateRequest, Message, StreamEvent};
use agbridge_cli::{join_prompt, Cli};
use agbridge_session::{ContextBuilder, SessionDiscovery, SessionParser};
use anyhow::{anyhow, bail, Context, Result};
use tokio_stream::StreamExt;

use crate::auth_commands::load_valid_credentials;
use crate::runtime_config::{context_builder, gemini_config, oauth_flow, session_discovery};
use crate::session_commands::load_session;

#[derive(Debug, Clone, Default)]
pub(crate) struct SendArgs {
    pub(crate) prompt: String,
    pub(crate) session: Option<String>,
    pub(crate) no_context: bool,
    pub(crate) account: Option<String>,
    pub(crate) max_output_tokens: Option<u32>,
    pub(crate) temperature: Option<f32>,
}

/// A lone `-` reads the prompt from stdin.
pub(crate) fn resolve_prompt(words: &[String]) -> Result<String> {
    if let [only] = words {
        if only == "-" {
            let mut prompt = String::new();
            std::io::stdin()
                .read_to_string(&mut prompt)
                .context("failed to read prompt from stdin")?;
            return join_prompt(&[prompt]);
        }
    }
    join_prompt(words)
}

/// Prepends the session context to the prompt.
///
/// Without an explicit session id a missing or unreadable session only costs
/// the context; a named session that cannot be loaded is an error.
pub(crate) fn contextualize(
    discovery: &SessionDiscovery,
    parser: &SessionParser,
    builder: &ContextBuilder,
    prompt: &str,
    session: Option<&str>,
) -> Result<Vec<Message>> {
    let messages = vec![Message::user(prompt)];
    match load_session(discovery, parser, session) {
        Ok(parsed) => {
            tracing::debug!(
                session = %parsed.id,
                version = parsed.version.as_str(),
                "injecting session context"
            );
            Ok(builder.inject(&messages, &parsed))
        }
        Err(error) if session.is_none() => {
            tracing::warn!(error = %format!("{error:#}"), "sending without session context");
            Ok(messages)
        }
        Err(error) => Err(error),
    }
}

fn describe_request_error(error: BridgeAiError) -> anyhow::Error {
    match &error {
        BridgeAiError::HttpStatus { status, .. } if *status == 401 || *status == 403 => anyhow!(
            "model request was rejected with status {status}; run 'agbridge login' to sign in again"
        ),
        _ => anyhow!(error).context("model request failed"),
    }
}

/// Writes every converted event as an SSE frame, flushing after each one.
pub(crate) async fn stream_reply(
    client: &GeminiClient,
    request: &GenerateRequest,
    access_token: &str,
    out: &mut impl Write,
) -> Result<()> {
    let mut events = client
        .stream_generate(request, access_token)
        .await
        .map_err(describe_request_error)?;
    let mut failure = None;
    while let Some(event) = events.next().await {
        out.write_all(event.to_sse_frame().as_bytes())?;
        out.flush()?;
        if let StreamEvent::Error { error } = &event {
            failure = Some(format!("{}: {}", error.kind, error.message));
        }
        if event.is_terminal() {
            break;
        }
    }
    if let Some(failure) = failure {
        bail!("model stream ended with an error ({failure})");
    }
    Ok(())
}

pub(crate) async fn execute_send(cli: &Cli, args: &SendArgs, out: &mut impl Write) -> Result<()> {
    let flow = oauth_flow(cli)?;
    let credentials = load_valid_credentials(&flow, args.account.as_deref()).await?;
    let messages = if args.no_context {
        vec![Message::user(args.prompt.as_str())]
    } else {
        contextualize(
            &session_discovery(cli),
            &SessionParser::new(),
            &context_builder(cli),
            &args.prompt,
            args.session.as_deref(),
        )?
    };
    let mut request = GenerateRequest::new(cli.model.as_str(), messages);
    request.max_tokens = args.max_output_tokens;
    request.temperature = args.temperature;

    let client = GeminiClient::new(gemini_config(cli))
        .map_err(|error| anyhow!(error).context("failed to build model client"))?;
    stream_reply(&client, &request, &credentials.access_token, out).await
}

#[cfg(test)]
mod tests {
    use std::fs;

    use agbridge_ai::{GeminiClient, GeminiConfig, GenerateRequest, Message, MessageRole};
    use agbridge_session::{ContextBuilder, SessionDiscovery, SessionParser};
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    use super::{contextualize, stream_reply};

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_base: server.url("/v1beta"),
            max_retries: 0,
            ..GeminiConfig::default()
        })
        .expect("client")
    }

    #[test]
    fn functional_contextualize_degrades_when_no_session_exists() {
        let empty = TempDir::new().expect("tempdir");
        let discovery = SessionDiscovery::with_roots(vec![empty.path().to_path_buf()]);
        let messages = contextualize(
            &discovery,
            &SessionParser::new(),
            &ContextBuilder::default(),
            "hello",
            None,
        )
        .expect("degrades");
        assert_eq!(messages, vec![Message::user("hello")]);

        assert!(contextualize(
            &discovery,
            &SessionParser::new(),
            &ContextBuilder::default(),
            "hello",
            Some("missing"),
        )
        .is_err());
    }

    #[test]
    fn functional_contextualize_prepends_latest_session() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join("work.json"),
            json!({"sessionId": "work", "goal": "Fix the flaky test", "plan": ["rerun"]})
                .to_string(),
        )
        .expect("write");
        let discovery = SessionDiscovery::with_roots(vec![dir.path().to_path_buf()]);
        let messages = contextualize(
            &discovery,
            &SessionParser::new(),
            &ContextBuilder::default(),
            "continue",
            None,
        )
        .expect("context");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].text_content().contains("Fix the flaky test"));
    }

    #[tokio::test]
    async fn integration_stream_reply_writes_sse_frames() {
        let server = MockServer::start();
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-test:streamGenerateContent")
                .query_param("alt", "sse")
                .header("authorization", "Bearer ya29.live");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        });

        let request = GenerateRequest::new("gemini-test", vec![Message::user("hi")]);
        let mut out = Vec::new();
        stream_reply(&client_for(&server), &request, "ya29.live", &mut out)
            .await
            .expect("stream");
        mock.assert();

        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.matches("event: content_block_delta\n").count(), 2);
        assert_eq!(text.matches("event: message_stop\n").count(), 1);
        assert!(text.contains("\"text\":\"Hel\""));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn regression_unauthorized_reply_points_to_login() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-test:streamGenerateContent");
            then.status(401).body("expired");
        });
        let request = GenerateRequest::new("gemini-test", vec![Message::user("hi")]);
        let mut out = Vec::new();
        let error = stream_reply(&client_for(&server), &request, "ya29.old", &mut out)
            .await
            .expect_err("401");
        assert!(error.to_string().contains("agbridge login"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn regression_error_record_ends_stream_with_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-test:streamGenerateContent");
            then.status(200).body(
                "data: {\"error\":{\"code\":429,\"message\":\"quota\",\"status\":\"RESOURCE_EXHAUSTED\"}}\n\n",
            );
        });
        let request = GenerateRequest::new("gemini-test", vec![Message::user("hi")]);
        let mut out = Vec::new();
        let error = stream_reply(&client_for(&server), &request, "ya29.live", &mut out)
            .await
            .expect_err("error event");
        assert!(error.to_string().contains("quota"));
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.matches("event: error\n").count(), 1);
    }
}
