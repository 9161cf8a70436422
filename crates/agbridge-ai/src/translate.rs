//! Translation between the forward content-block protocol and the user/model
//! parts protocol.
//!
//! The mapping is lossless except for system messages: every system message is
//! folded into one `systemInstruction`, so translating back yields no system
//! role.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{BridgeAiError, ContentBlock, Message, MessageRole};

const REASONING_OPEN: &str = "<thinking>";
const REASONING_CLOSE: &str = "</thinking>";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// Roles of the user/model protocol.
pub enum GeminiRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeminiContent {
    pub role: GeminiRole,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// One part of a user/model message. Exactly one payload field is expected.
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl GeminiPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            function_call: Some(call),
            ..Self::default()
        }
    }

    pub fn function_response(response: FunctionResponse) -> Self {
        Self {
            function_response: Some(response),
            ..Self::default()
        }
    }

    fn is_thought(&self) -> bool {
        self.thought.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemInstruction {
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, PartialEq)]
/// A translated conversation: the message list plus the folded system field.
pub struct GeminiConversation {
    pub contents: Vec<GeminiContent>,
    pub system_instruction: Option<SystemInstruction>,
}

impl GeminiConversation {
    pub fn system_text(&self) -> Option<String> {
        self.system_instruction.as_ref().map(|instruction| {
            instruction
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
    }
}

/// Wraps system text into the separate system-instruction field.
///
/// Returns `None` for blank text so callers can omit the field entirely.
pub fn translate_system(text: &str) -> Option<SystemInstruction> {
    if text.trim().is_empty() {
        return None;
    }
    Some(SystemInstruction {
        parts: vec![GeminiPart::text(text)],
    })
}

/// Translates a forward-protocol message list.
///
/// System messages are folded, in order and joined by a blank line, into the
/// system instruction. Any block that has no equivalent fails the whole call.
pub fn to_gemini(messages: &[Message]) -> Result<GeminiConversation, BridgeAiError> {
    let system = messages
        .iter()
        .filter(|message| message.role == MessageRole::System)
        .map(system_message_text)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut tool_names: HashMap<String, String> = HashMap::new();
    let mut contents = Vec::new();
    for (position, message) in messages.iter().enumerate() {
        let role = match message.role {
            MessageRole::System => continue,
            MessageRole::User => GeminiRole::User,
            MessageRole::Assistant => GeminiRole::Model,
        };

        let mut parts = Vec::with_capacity(message.content.len());
        for block in &message.content {
            match block {
                ContentBlock::Text { text } => parts.push(GeminiPart::text(text.clone())),
                ContentBlock::ToolUse { id, name, input } => {
                    if role != GeminiRole::Model {
                        return Err(BridgeAiError::Unmappable(format!(
                            "message {position}: tool_use '{id}' must come from the assistant"
                        )));
                    }
                    tool_names.insert(id.clone(), name.clone());
                    parts.push(GeminiPart::function_call(FunctionCall {
                        id: Some(id.clone()),
                        name: name.clone(),
                        args: input.clone(),
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    if role != GeminiRole::User {
                        return Err(BridgeAiError::Unmappable(format!(
                            "message {position}: tool_result '{tool_use_id}' must come from the user"
                        )));
                    }
                    let Some(name) = tool_names.get(tool_use_id) else {
                        return Err(BridgeAiError::Unmappable(format!(
                            "message {position}: tool_result '{tool_use_id}' does not match any earlier tool_use"
                        )));
                    };
                    let response = if *is_error {
                        json!({ "error": content })
                    } else {
                        json!({ "content": content })
                    };
                    parts.push(GeminiPart::function_response(FunctionResponse {
                        id: Some(tool_use_id.clone()),
                        name: name.clone(),
                        response,
                    }));
                }
                ContentBlock::Unsupported => {
                    return Err(BridgeAiError::Unmappable(format!(
                        "message {position}: content block type is not supported by the target protocol"
                    )));
                }
            }
        }

        if parts.is_empty() {
            return Err(BridgeAiError::Unmappable(format!(
                "message {position}: a message without content blocks has no equivalent"
            )));
        }
        contents.push(GeminiContent { role, parts });
    }

    Ok(GeminiConversation {
        contents,
        system_instruction: translate_system(&system),
    })
}

fn system_message_text(message: &Message) -> Result<String, BridgeAiError> {
    let mut texts = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Text { text } => texts.push(text.as_str()),
            _ => {
                return Err(BridgeAiError::Unmappable(
                    "system messages may only carry text".to_string(),
                ))
            }
        }
    }
    Ok(texts.join("\n"))
}

/// Reconstructs a forward-protocol message from one user/model message.
///
/// Thought parts are skipped. Reasoning blocks are stripped from model text
/// only; user text comes back verbatim. Function calls without an id receive
/// a positional one.
pub fn from_gemini(content: &GeminiContent) -> Result<Message, BridgeAiError> {
    let role = match content.role {
        GeminiRole::User => MessageRole::User,
        GeminiRole::Model => MessageRole::Assistant,
    };

    let mut blocks = Vec::with_capacity(content.parts.len());
    for (index, part) in content.parts.iter().enumerate() {
        if part.is_thought() {
            continue;
        }
        if let Some(text) = part.text.as_deref() {
            if content.role == GeminiRole::User || !text.contains(REASONING_OPEN) {
                blocks.push(ContentBlock::text(text));
                continue;
            }
            let stripped = strip_reasoning(text);
            if !stripped.is_empty() {
                blocks.push(ContentBlock::Text { text: stripped });
            }
            continue;
        }
        if let Some(call) = part.function_call.as_ref() {
            blocks.push(ContentBlock::ToolUse {
                id: call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("gemini_call_{}", index + 1)),
                name: call.name.clone(),
                input: call.args.clone(),
            });
            continue;
        }
        if let Some(response) = part.function_response.as_ref() {
            let (content, is_error) = split_function_response(&response.response);
            blocks.push(ContentBlock::ToolResult {
                tool_use_id: response
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("gemini_call_{}", index + 1)),
                content,
                is_error,
            });
            continue;
        }
        return Err(BridgeAiError::Unmappable(format!(
            "part {index} carries no text, functionCall, or functionResponse"
        )));
    }

    Ok(Message {
        role,
        content: blocks,
    })
}

fn split_function_response(response: &Value) -> (Value, bool) {
    let Some(object) = response.as_object() else {
        return (response.clone(), false);
    };
    if object.len() == 1 {
        if let Some(error) = object.get("error") {
            return (error.clone(), true);
        }
        if let Some(content) = object.get("content") {
            return (content.clone(), false);
        }
    }
    (response.clone(), false)
}

/// Removes `<thinking>…</thinking>` blocks from a complete response text.
///
/// An unterminated opening delimiter drops everything after it.
pub fn strip_reasoning(text: &str) -> String {
    if !text.contains(REASONING_OPEN) {
        return text.to_string();
    }

    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(REASONING_OPEN) {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + REASONING_OPEN.len()..];
        match after_open.find(REASONING_CLOSE) {
            Some(end) => rest = &after_open[end + REASONING_CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    output.push_str(rest);
    output.trim_start().to_string()
}
