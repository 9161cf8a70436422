use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    hardening::ToolHardening,
    retry::{is_retryable_error, is_retryable_status, new_request_id, retry_after_ms, RetryPolicy},
    stream::{convert_stream, StreamEvent, StreamTranslator, DEFAULT_STREAM_QUEUE_CAPACITY},
    translate::{from_gemini, to_gemini, translate_system, GeminiContent},
    BridgeAiError, ContentBlock, Message, ToolDefinition,
};

#[derive(Debug, Clone)]
/// Connection settings for the user/model protocol endpoint.
pub struct GeminiConfig {
    pub api_base: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
    pub stream_queue_capacity: usize,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout_ms: 120_000,
            max_retries: 2,
            retry_budget_ms: 0,
            stream_queue_capacity: DEFAULT_STREAM_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A forward-protocol request about to be translated and sent.
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
    hardening: ToolHardening,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, BridgeAiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            config,
            hardening: ToolHardening::default(),
        })
    }

    pub fn with_hardening(mut self, hardening: ToolHardening) -> Self {
        self.hardening = hardening;
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{model}:{method}",
            self.config.api_base.trim_end_matches('/')
        )
    }

    /// Sends the request and returns the complete reply as a forward message.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        access_token: &str,
    ) -> Result<Message, BridgeAiError> {
        let body = build_generate_content_body(request, &self.hardening)?;
        let url = self.endpoint(&request.model, "generateContent");
        let response = self.send_with_retries(&url, &[], &body, access_token).await?;
        let raw = response.text().await?;
        let mut message = parse_generate_content_response(&raw)?;
        restore_tool_names(&mut message, &self.hardening);
        Ok(message)
    }

    /// Sends the request and returns the converted event stream.
    ///
    /// Errors before the first byte (status, connection) are returned directly;
    /// later failures arrive as a terminal error event.
    pub async fn stream_generate(
        &self,
        request: &GenerateRequest,
        access_token: &str,
    ) -> Result<ReceiverStream<StreamEvent>, BridgeAiError> {
        let body = build_generate_content_body(request, &self.hardening)?;
        let url = self.endpoint(&request.model, "streamGenerateContent");
        let response = self
            .send_with_retries(&url, &[("alt", "sse")], &body, access_token)
            .await?;
        let translator = StreamTranslator::with_tool_namespace(self.hardening.namespace.clone());
        Ok(convert_stream(
            response.bytes_stream(),
            translator,
            self.config.stream_queue_capacity,
        ))
    }

    async fn send_with_retries(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &Value,
        access_token: &str,
    ) -> Result<reqwest::Response, BridgeAiError> {
        if access_token.trim().is_empty() {
            return Err(BridgeAiError::MissingAccessToken);
        }
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            budget_ms: self.config.retry_budget_ms,
        };
        let started = Instant::now();
        let mut attempt = 0usize;

        loop {
            let result = self
                .client
                .post(url)
                .bearer_auth(access_token)
                .header("x-agbridge-request-id", new_request_id())
                .header("x-agbridge-retry-attempt", attempt.to_string())
                .query(query)
                .json(body)
                .send()
                .await
                .map_err(BridgeAiError::from);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = retry_after_ms(response.headers());
                    let raw = response.text().await.unwrap_or_default();
                    let delay_ms = policy.delay_ms(attempt, retry_after);
                    if is_retryable_status(status) && policy.allows(attempt, elapsed_ms, delay_ms)
                    {
                        tracing::warn!(status, attempt, delay_ms, "retrying provider request");
                        sleep(Duration::from_millis(delay_ms)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(BridgeAiError::HttpStatus { status, body: raw });
                }
                Err(error) => {
                    let delay_ms = policy.delay_ms(attempt, None);
                    if is_retryable_error(&error) && policy.allows(attempt, elapsed_ms, delay_ms) {
                        tracing::warn!(%error, attempt, delay_ms, "retrying provider request");
                        sleep(Duration::from_millis(delay_ms)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }
}

/// Builds the `generateContent` body: translated contents, the folded and
/// hardened system instruction, hardened tool declarations, and generation
/// settings.
pub fn build_generate_content_body(
    request: &GenerateRequest,
    hardening: &ToolHardening,
) -> Result<Value, BridgeAiError> {
    let mut conversation = to_gemini(&request.messages)?;
    let mut system = conversation.system_text().unwrap_or_default();
    if !request.tools.is_empty() {
        hardening.namespace_history(&mut conversation.contents);
    }
    let mut body = json!({
        "contents": serde_json::to_value(&conversation.contents)?,
    });

    if !request.tools.is_empty() {
        let (tools, hardened_system) = hardening.apply(&request.tools, &system);
        system = hardened_system;
        body["tools"] = json!([{
            "functionDeclarations": tools
                .iter()
                .map(|tool| json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }))
                .collect::<Vec<_>>(),
        }]);
    }

    if let Some(instruction) = translate_system(&system) {
        body["systemInstruction"] = serde_json::to_value(instruction)?;
    }

    if request.temperature.is_some() || request.max_tokens.is_some() {
        let mut generation_config = json!({});
        if let Some(temperature) = request.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        body["generationConfig"] = generation_config;
    }

    Ok(body)
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<GenerateContentCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentCandidate {
    content: Option<GeminiContent>,
}

fn parse_generate_content_response(raw: &str) -> Result<Message, BridgeAiError> {
    let parsed: GenerateContentResponse = serde_json::from_str(raw)?;
    let content = parsed
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .ok_or_else(|| {
            BridgeAiError::InvalidResponse("response contained no candidate content".to_string())
        })?;
    from_gemini(&content)
}

fn restore_tool_names(message: &mut Message, hardening: &ToolHardening) {
    for block in &mut message.content {
        if let ContentBlock::ToolUse { name, .. } = block {
            *name = hardening.restore_name(name).to_string();
        }
    }
}
