//! Resilient session parsing.
//!
//! A session file is matched against an ordered list of recognizers and the
//! first one that claims the document produces the record. The generic
//! recognizer is last and claims everything, so any well-formed JSON yields a
//! record. Malformed JSON yields a partial placeholder instead of an error.

use std::{
    collections::{BTreeMap, VecDeque},
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const MAX_SESSION_FILE_BYTES: u64 = 50 * 1024 * 1024;
pub const UNKNOWN_GOAL: &str = "Unknown goal";

const SESSION_FILE_NAME: &str = "session.json";
const ACTION_KEYS: &[&str] = &["action", "title", "description", "text", "content", "name"];
const STATUS_KEYS: &[&str] = &["status", "state"];
const INDEX_KEYS: &[&str] = &["index", "step", "id"];
const SESSION_ID_KEYS: &[&str] = &["sessionId", "session_id", "id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl StepStatus {
    /// Maps loosely spelled status labels; anything unknown is `Pending`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "done" | "finished" | "success" | "succeeded" => {
                Self::Completed
            }
            "executing" | "running" | "in_progress" | "in-progress" | "active" | "started" => {
                Self::Executing
            }
            "failed" | "failure" | "error" | "errored" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: u64,
    pub action: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    V2,
    V1,
    Generic,
    Unparsable,
}

impl FormatVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V1 => "v1",
            Self::Generic => "generic",
            Self::Unparsable => "unparsable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Normalized view of one session regardless of its on-disk format.
///
/// Every entry of `completed` names a step in `plan_steps` whose status is
/// `Completed`.
pub struct ParsedSession {
    pub id: String,
    pub goal: String,
    pub plan_steps: Vec<PlanStep>,
    pub completed: Vec<u64>,
    pub modified_files: Vec<String>,
    pub variables: BTreeMap<String, Value>,
    pub version: FormatVersion,
    pub partial: bool,
}

impl ParsedSession {
    fn assemble(
        id: String,
        goal: String,
        plan_steps: Vec<PlanStep>,
        modified_files: Vec<String>,
        variables: BTreeMap<String, Value>,
        version: FormatVersion,
        partial: bool,
    ) -> Self {
        let completed = plan_steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .map(|step| step.index)
            .collect();
        Self {
            id,
            goal,
            plan_steps,
            completed,
            modified_files,
            variables,
            version,
            partial,
        }
    }

    /// Placeholder for a session whose file could not be decoded.
    pub fn unparsable(id: impl Into<String>) -> Self {
        Self::assemble(
            id.into(),
            UNKNOWN_GOAL.to_string(),
            Vec::new(),
            Vec::new(),
            BTreeMap::new(),
            FormatVersion::Unparsable,
            true,
        )
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.plan_steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
    }

    pub fn pending_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.plan_steps
            .iter()
            .filter(|step| step.status != StepStatus::Completed)
    }
}

#[derive(Debug, Error)]
pub enum SessionParseError {
    #[error("failed to read session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {path} is {size} bytes, above the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
}

/// One on-disk session format.
pub trait FormatRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns a record when the document is in this format.
    fn recognize(&self, document: &Value, fallback_id: &str) -> Option<ParsedSession>;
}

#[derive(Debug, Clone, Copy, Default)]
/// `schemaVersion: 2` documents with a nested `task` object.
pub struct V2Recognizer;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Document {
    session_id: Option<String>,
    task: V2Task,
    #[serde(default)]
    workspace: Option<V2Workspace>,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct V2Task {
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    steps: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Workspace {
    #[serde(default)]
    modified_files: Vec<Value>,
}

fn is_schema_v2(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Number(number)) => number
            .as_f64()
            .is_some_and(|version| version.trunc() == 2.0),
        Some(Value::String(version)) => {
            let version = version.trim();
            version == "2" || version.starts_with("2.")
        }
        _ => false,
    }
}

impl FormatRecognizer for V2Recognizer {
    fn name(&self) -> &'static str {
        "v2"
    }

    fn recognize(&self, document: &Value, fallback_id: &str) -> Option<ParsedSession> {
        let object = document.as_object()?;
        if !is_schema_v2(object.get("schemaVersion")) || !object.get("task")?.is_object() {
            return None;
        }
        let parsed: V2Document = serde_json::from_value(document.clone()).ok()?;
        let steps = parsed
            .task
            .steps
            .iter()
            .enumerate()
            .filter_map(|(position, value)| step_from_value(value, position))
            .collect();
        let files = parsed
            .workspace
            .map(|workspace| file_list(&workspace.modified_files))
            .unwrap_or_default();
        Some(ParsedSession::assemble(
            non_empty_or(parsed.session_id, fallback_id),
            non_empty_or(parsed.task.goal, UNKNOWN_GOAL),
            steps,
            files,
            parsed.variables.map(variable_map).unwrap_or_default(),
            FormatVersion::V2,
            false,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Flat documents with `sessionId`, `goal` and a `plan` array.
pub struct V1Recognizer;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V1Document {
    session_id: String,
    goal: String,
    plan: Vec<Value>,
    #[serde(default)]
    completed: Vec<Value>,
    #[serde(default)]
    files: Vec<Value>,
    #[serde(default)]
    vars: Option<Map<String, Value>>,
}

impl FormatRecognizer for V1Recognizer {
    fn name(&self) -> &'static str {
        "v1"
    }

    fn recognize(&self, document: &Value, fallback_id: &str) -> Option<ParsedSession> {
        let object = document.as_object()?;
        let shaped = object.get("sessionId").is_some_and(Value::is_string)
            && object.get("goal").is_some_and(Value::is_string)
            && object.get("plan").is_some_and(Value::is_array);
        if !shaped {
            return None;
        }
        let parsed: V1Document = serde_json::from_value(document.clone()).ok()?;
        let mut steps = parsed
            .plan
            .iter()
            .enumerate()
            .filter_map(|(position, value)| step_from_value(value, position))
            .collect::<Vec<_>>();

        for reference in parsed.completed.iter().filter_map(Value::as_u64) {
            match steps.iter_mut().find(|step| step.index == reference) {
                Some(step) => step.status = StepStatus::Completed,
                None => tracing::debug!(reference, "dropping completed reference to unknown step"),
            }
        }

        Some(ParsedSession::assemble(
            non_empty_or(Some(parsed.session_id), fallback_id),
            non_empty_or(Some(parsed.goal), UNKNOWN_GOAL),
            steps,
            file_list(&parsed.files),
            parsed.vars.map(variable_map).unwrap_or_default(),
            FormatVersion::V1,
            false,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Key table driving the generic recognizer.
pub struct HeuristicRules {
    pub goal_keys: Vec<String>,
    pub step_keys: Vec<String>,
    pub file_keys: Vec<String>,
    pub variable_keys: Vec<String>,
    pub max_depth: usize,
}

impl Default for HeuristicRules {
    fn default() -> Self {
        fn keys(values: &[&str]) -> Vec<String> {
            values.iter().map(|value| value.to_string()).collect()
        }
        Self {
            goal_keys: keys(&["goal", "objective", "task", "title", "prompt", "description"]),
            step_keys: keys(&["steps", "plan", "todos", "tasks", "actions"]),
            file_keys: keys(&[
                "files",
                "modifiedFiles",
                "modified_files",
                "changedFiles",
                "touchedFiles",
                "paths",
            ]),
            variable_keys: keys(&["variables", "vars", "env", "context"]),
            max_depth: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Breadth-first key search for documents in no known format.
pub struct GenericRecognizer {
    rules: HeuristicRules,
}

impl GenericRecognizer {
    pub fn new(rules: HeuristicRules) -> Self {
        Self { rules }
    }
}

#[derive(Default)]
struct GenericFindings {
    goal: Option<String>,
    steps: Option<Vec<PlanStep>>,
    files: Option<Vec<String>>,
    variables: Option<BTreeMap<String, Value>>,
}

impl GenericFindings {
    fn complete(&self) -> bool {
        self.goal.is_some()
            && self.steps.is_some()
            && self.files.is_some()
            && self.variables.is_some()
    }

    fn inspect(&mut self, object: &Map<String, Value>, rules: &HeuristicRules) {
        if self.goal.is_none() {
            self.goal = rules.goal_keys.iter().find_map(|key| {
                object
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|goal| !goal.is_empty())
                    .map(str::to_string)
            });
        }
        if self.steps.is_none() {
            self.steps = rules.step_keys.iter().find_map(|key| {
                let values = object.get(key)?.as_array()?;
                Some(
                    values
                        .iter()
                        .enumerate()
                        .filter_map(|(position, value)| step_from_value(value, position))
                        .collect(),
                )
            });
        }
        if self.files.is_none() {
            self.files = rules
                .file_keys
                .iter()
                .find_map(|key| object.get(key)?.as_array().map(|values| file_list(values)));
        }
        if self.variables.is_none() {
            self.variables = rules
                .variable_keys
                .iter()
                .find_map(|key| object.get(key)?.as_object().cloned().map(variable_map));
        }
    }
}

impl FormatRecognizer for GenericRecognizer {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn recognize(&self, document: &Value, fallback_id: &str) -> Option<ParsedSession> {
        let mut findings = GenericFindings::default();
        let mut queue = VecDeque::from([(document, 0usize)]);
        while let Some((value, depth)) = queue.pop_front() {
            if findings.complete() {
                break;
            }
            let children = match value {
                Value::Object(object) => {
                    findings.inspect(object, &self.rules);
                    object.values().collect::<Vec<_>>()
                }
                Value::Array(values) => values.iter().collect(),
                _ => continue,
            };
            if depth < self.rules.max_depth {
                queue.extend(
                    children
                        .into_iter()
                        .filter(|child| child.is_object() || child.is_array())
                        .map(|child| (child, depth + 1)),
                );
            }
        }

        let id = document
            .as_object()
            .and_then(|object| {
                SESSION_ID_KEYS
                    .iter()
                    .find_map(|key| object.get(*key).and_then(Value::as_str))
            })
            .map(str::to_string);
        Some(ParsedSession::assemble(
            non_empty_or(id, fallback_id),
            findings.goal.unwrap_or_else(|| UNKNOWN_GOAL.to_string()),
            findings.steps.unwrap_or_default(),
            findings.files.unwrap_or_default(),
            findings.variables.unwrap_or_default(),
            FormatVersion::Generic,
            true,
        ))
    }
}

/// Ordered recognizer chain plus the file size guard.
pub struct SessionParser {
    recognizers: Vec<Box<dyn FormatRecognizer>>,
    max_file_bytes: u64,
}

impl Default for SessionParser {
    fn default() -> Self {
        Self::with_rules(HeuristicRules::default())
    }
}

impl std::fmt::Debug for SessionParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionParser")
            .field(
                "recognizers",
                &self.recognizers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("max_file_bytes", &self.max_file_bytes)
            .finish()
    }
}

impl SessionParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: HeuristicRules) -> Self {
        Self {
            recognizers: vec![
                Box::new(V2Recognizer),
                Box::new(V1Recognizer),
                Box::new(GenericRecognizer::new(rules)),
            ],
            max_file_bytes: MAX_SESSION_FILE_BYTES,
        }
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Reads and normalizes one session file.
    ///
    /// The size limit is checked from metadata before the body is read, and
    /// the read itself stops one byte past the limit.
    pub fn parse(&self, path: &Path) -> Result<ParsedSession, SessionParseError> {
        let io_error = |source| SessionParseError::Io {
            path: path.to_path_buf(),
            source,
        };
        let too_large = |size| SessionParseError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: self.max_file_bytes,
        };
        let file = File::open(path).map_err(io_error)?;
        let size = file.metadata().map_err(io_error)?.len();
        if size > self.max_file_bytes {
            return Err(too_large(size));
        }
        let raw = read_limited(file, self.max_file_bytes).map_err(io_error)?;
        if raw.len() as u64 > self.max_file_bytes {
            return Err(too_large(raw.len() as u64));
        }
        Ok(self.parse_bytes(&raw, &session_id_from_path(path)))
    }

    /// Normalizes an in-memory document. Never fails.
    pub fn parse_bytes(&self, raw: &[u8], fallback_id: &str) -> ParsedSession {
        let document: Value = match serde_json::from_slice(raw) {
            Ok(document) => document,
            Err(error) => {
                tracing::warn!(session = fallback_id, %error, "session file is not valid JSON; using placeholder");
                return ParsedSession::unparsable(fallback_id);
            }
        };
        for recognizer in &self.recognizers {
            if let Some(session) = recognizer.recognize(&document, fallback_id) {
                tracing::debug!(session = %session.id, format = recognizer.name(), "parsed session");
                return session;
            }
        }
        ParsedSession::unparsable(fallback_id)
    }
}

/// Reads at most `limit + 1` bytes, so an oversized source shows up as a
/// buffer longer than `limit` without being read to the end.
fn read_limited(reader: impl Read, limit: u64) -> io::Result<Vec<u8>> {
    let mut raw = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut raw)?;
    Ok(raw)
}

/// File stem, or the parent directory name for `<id>/session.json`.
pub fn session_id_from_path(path: &Path) -> String {
    let is_directory_layout = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == SESSION_FILE_NAME);
    let candidate = if is_directory_layout {
        path.parent().and_then(Path::file_name)
    } else {
        path.file_stem()
    };
    candidate
        .and_then(|name| name.to_str())
        .unwrap_or("session")
        .to_string()
}

fn non_empty_or(value: Option<String>, fallback: &str) -> String {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn step_from_value(value: &Value, position: usize) -> Option<PlanStep> {
    let default_index = position as u64 + 1;
    match value {
        Value::String(action) if !action.trim().is_empty() => Some(PlanStep {
            index: default_index,
            action: action.trim().to_string(),
            status: StepStatus::Pending,
        }),
        Value::Object(object) => {
            let action = ACTION_KEYS
                .iter()
                .find_map(|key| object.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .filter(|action| !action.is_empty())?
                .to_string();
            let index = INDEX_KEYS
                .iter()
                .find_map(|key| object.get(*key).and_then(Value::as_u64))
                .unwrap_or(default_index);
            let mut status = STATUS_KEYS
                .iter()
                .find_map(|key| object.get(*key).and_then(Value::as_str))
                .map(StepStatus::from_label)
                .unwrap_or(StepStatus::Pending);
            let done_flag = ["done", "completed"]
                .iter()
                .any(|key| object.get(*key).and_then(Value::as_bool) == Some(true));
            if done_flag {
                status = StepStatus::Completed;
            }
            Some(PlanStep {
                index,
                action,
                status,
            })
        }
        _ => None,
    }
}

fn file_list(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|value| match value {
            Value::String(path) => Some(path.as_str()),
            Value::Object(object) => object.get("path").and_then(Value::as_str),
            _ => None,
        })
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

fn variable_map(object: Map<String, Value>) -> BTreeMap<String, Value> {
    object.into_iter().collect()
}
