//! Discovery, parsing and context rendering for IDE work sessions.

pub mod context;
pub mod discovery;
pub mod parser;

pub use context::{
    is_sensitive_key, redact_value, redact_variables, ContextBuilder, ContextBuilderConfig,
    CHARS_PER_TOKEN, DEFAULT_TOKEN_BUDGET, REDACTED_PLACEHOLDER,
};
pub use discovery::{
    default_search_roots, platform_sessions_dir, SessionDiscovery, SessionMetadata,
    DISCOVERY_CACHE_TTL, SESSIONS_DIR_ENV,
};
pub use parser::{
    session_id_from_path, FormatRecognizer, FormatVersion, GenericRecognizer, HeuristicRules,
    ParsedSession, PlanStep, SessionParseError, SessionParser, StepStatus, V1Recognizer,
    V2Recognizer, MAX_SESSION_FILE_BYTES, UNKNOWN_GOAL,
};
