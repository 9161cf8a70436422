//! Wire-protocol layer for agbridge.
//!
//! Holds the forward (content-block) message model, translation into the
//! user/model parts protocol, tool hardening, streamed-response conversion,
//! and the HTTP client that ties them together.
mod gemini;
mod hardening;
mod retry;
mod stream;
mod translate;
mod types;

pub use gemini::{build_generate_content_body, GeminiClient, GeminiConfig, GenerateRequest};
pub use hardening::{
    forbid_additional_properties, namespace_tool, prepend_system_fragment, sign_tool,
    strip_namespace, tool_signature, verify_tool_signature, ToolHardening,
    TOOL_NAMESPACE_PREFIX, TOOL_USE_SYSTEM_FRAGMENT,
};
pub use stream::{
    convert_stream, StreamDelta, StreamErrorBody, StreamEvent, StreamTranslator,
    DEFAULT_STREAM_QUEUE_CAPACITY, MAX_STREAM_RECORD_BYTES, STREAM_END_SENTINEL,
};
pub use translate::{
    from_gemini, strip_reasoning, to_gemini, translate_system, FunctionCall, FunctionResponse,
    GeminiContent, GeminiConversation, GeminiPart, GeminiRole, SystemInstruction,
};
pub use types::{BridgeAiError, ContentBlock, Message, MessageRole, ToolDefinition};
