use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Roles of the forward (user/assistant) protocol.
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// One content block of a forward-protocol message.
///
/// Block types this bridge does not understand deserialize into
/// `Unsupported` so that translation can reject them instead of dropping them.
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default, skip_serializing_if = "is_false")]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: Value, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A forward-protocol message: one role and an ordered list of blocks.
pub struct Message {
    pub role: MessageRole,
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<ContentBlock>,
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawContent {
        Text(String),
        Blocks(Vec<ContentBlock>),
    }

    Ok(match RawContent::deserialize(deserializer)? {
        RawContent::Text(text) => vec![ContentBlock::Text { text }],
        RawContent::Blocks(blocks) => blocks,
    })
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    pub fn user_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content,
        }
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A tool (function) definition as declared by the forward protocol.
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "input_schema")]
    pub parameters: Value,
}

#[derive(Debug, Error)]
/// Errors raised by translation, streaming, and the HTTP client.
pub enum BridgeAiError {
    #[error("missing access token")]
    MissingAccessToken,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unmappable content: {0}")]
    Unmappable(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ContentBlock, Message, MessageRole, ToolDefinition};

    #[test]
    fn unit_message_accepts_plain_string_content() {
        let message: Message =
            serde_json::from_value(json!({"role": "user", "content": "hello"})).expect("parse");
        assert_eq!(message.role, MessageRole::User);
        assert_eq!(message.content, vec![ContentBlock::text("hello")]);
    }

    #[test]
    fn unit_unknown_block_types_become_unsupported() {
        let message: Message = serde_json::from_value(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "look"},
                {"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}}
            ]
        }))
        .expect("parse");
        assert_eq!(message.content[1], ContentBlock::Unsupported);
    }

    #[test]
    fn unit_tool_definition_accepts_input_schema_alias() {
        let tool: ToolDefinition = serde_json::from_value(json!({
            "name": "read",
            "input_schema": {"type": "object"}
        }))
        .expect("parse");
        assert_eq!(tool.parameters, json!({"type": "object"}));
        assert!(tool.description.is_empty());
    }

    #[test]
    fn unit_text_content_joins_text_blocks() {
        let message = Message::assistant_blocks(vec![
            ContentBlock::text("first"),
            ContentBlock::tool_use("1", "read", json!({ "path": "README.md" })),
            ContentBlock::text("second"),
        ]);

        assert_eq!(message.text_content(), "first\nsecond");
    }
}
