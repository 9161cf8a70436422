//! Renders a parsed session into a bounded system-context block.
//!
//! Sections appear as goal, completed steps, pending steps, modified files and
//! variables. When the rendered text exceeds the character budget the builder
//! drops content in a fixed order: oldest completed steps down to a recency
//! floor, then the pending list collapses to a count, then variables go, then
//! the oldest modified files. The goal is always kept whole.

use std::collections::BTreeMap;

use agbridge_ai::Message;
use serde_json::Value;

use crate::parser::ParsedSession;

/// Characters assumed per token when converting the token budget.
pub const CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_TOKEN_BUDGET: usize = 12_500;
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "api_key",
    "apikey",
    "api-key",
    "api key",
    "secret",
    "password",
    "token",
    "credential",
    "auth",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBuilderConfig {
    pub max_tokens: usize,
    pub chars_per_token: usize,
    /// Most recent completed steps that survive truncation.
    pub recent_steps_floor: usize,
    /// Pending lists longer than this collapse into a count when over budget.
    pub pending_collapse_threshold: usize,
    pub include_variables: bool,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_TOKEN_BUDGET,
            chars_per_token: CHARS_PER_TOKEN,
            recent_steps_floor: 10,
            pending_collapse_threshold: 10,
            include_variables: true,
        }
    }
}

impl ContextBuilderConfig {
    pub fn max_chars(&self) -> usize {
        self.max_tokens.saturating_mul(self.chars_per_token.max(1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextBuilderConfig {
        &self.config
    }

    /// Renders `session` within the configured budget.
    ///
    /// Deterministic: the same session always yields the same text.
    pub fn build(&self, session: &ParsedSession) -> String {
        let variables = if self.config.include_variables {
            redact_variables(&session.variables)
        } else {
            BTreeMap::new()
        };
        let sections = Sections::collect(session, &variables);
        let budget = self.config.max_chars();
        let mut plan = Truncation::default();

        let droppable_completed = sections
            .completed
            .len()
            .saturating_sub(self.config.recent_steps_floor);
        while sections.measure(&plan) > budget && plan.completed_omitted < droppable_completed {
            plan.completed_omitted += 1;
        }
        if sections.measure(&plan) > budget
            && sections.pending.len() > self.config.pending_collapse_threshold
        {
            plan.pending_collapsed = true;
        }
        if sections.measure(&plan) > budget && !sections.variables.is_empty() {
            plan.variables_dropped = true;
        }
        while sections.measure(&plan) > budget && plan.files_omitted < sections.files.len() {
            plan.files_omitted += 1;
        }

        let rendered = sections.render(&plan);
        if rendered.len() > budget {
            tracing::debug!(
                session = %session.id,
                chars = rendered.len(),
                budget,
                "session context exceeds budget after truncation"
            );
        } else if plan != Truncation::default() {
            tracing::debug!(
                session = %session.id,
                completed_omitted = plan.completed_omitted,
                pending_collapsed = plan.pending_collapsed,
                variables_dropped = plan.variables_dropped,
                files_omitted = plan.files_omitted,
                "truncated session context"
            );
        }
        rendered
    }

    /// Returns `messages` with the rendered session as a leading system message.
    pub fn inject(&self, messages: &[Message], session: &ParsedSession) -> Vec<Message> {
        let mut injected = Vec::with_capacity(messages.len() + 1);
        injected.push(Message::system(self.build(session)));
        injected.extend(messages.iter().cloned());
        injected
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.ends_with("_key")
        || SENSITIVE_KEY_FRAGMENTS
            .iter()
            .any(|fragment| key.contains(fragment))
}

/// Replaces the value of every sensitive key, at any depth, with a placeholder.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, nested)| (key.clone(), redact_entry(key, nested)))
                .collect(),
        ),
        Value::Array(values) => Value::Array(values.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

pub fn redact_variables(variables: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    variables
        .iter()
        .map(|(key, value)| (key.clone(), redact_entry(key, value)))
        .collect()
}

fn redact_entry(key: &str, value: &Value) -> Value {
    if is_sensitive_key(key) {
        Value::String(REDACTED_PLACEHOLDER.to_string())
    } else {
        redact_value(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Truncation {
    completed_omitted: usize,
    pending_collapsed: bool,
    variables_dropped: bool,
    files_omitted: usize,
}

struct Block<'a> {
    title: String,
    lead: Option<String>,
    lines: &'a [String],
    lines_len: usize,
}

impl Block<'_> {
    fn len(&self) -> usize {
        self.title.len() + 1 + self.lead.as_ref().map_or(0, |lead| lead.len() + 1) + self.lines_len
    }

    fn write_to(&self, out: &mut String) {
        out.push_str(&self.title);
        out.push('\n');
        if let Some(lead) = &self.lead {
            out.push_str(lead);
            out.push('\n');
        }
        for line in self.lines {
            out.push_str(line);
            out.push('\n');
        }
    }
}

/// Pre-rendered lines with prefix sums so measuring a plan is cheap.
struct Sections {
    header: String,
    goal: Vec<String>,
    completed: Vec<String>,
    completed_prefix: Vec<usize>,
    pending: Vec<String>,
    files: Vec<String>,
    files_prefix: Vec<usize>,
    variables: Vec<String>,
}

impl Sections {
    fn collect(session: &ParsedSession, variables: &BTreeMap<String, Value>) -> Self {
        let completed = session
            .completed_steps()
            .map(|step| format!("- [{}] {}", step.index, step.action))
            .collect::<Vec<_>>();
        let pending = session
            .pending_steps()
            .map(|step| format!("- [{}] {} ({})", step.index, step.action, step.status.as_str()))
            .collect::<Vec<_>>();
        let files = session
            .modified_files
            .iter()
            .map(|path| format!("- {path}"))
            .collect::<Vec<_>>();
        let variables = variables
            .iter()
            .map(|(key, value)| format!("- {key}: {value}"))
            .collect();
        Self {
            header: format!("# Resumed session {}", session.id),
            goal: vec![session.goal.clone()],
            completed_prefix: prefix_lengths(&completed),
            completed,
            pending,
            files_prefix: prefix_lengths(&files),
            files,
            variables,
        }
    }

    fn blocks(&self, plan: &Truncation) -> Vec<Block<'_>> {
        let mut blocks = vec![
            Block {
                title: self.header.clone(),
                lead: None,
                lines: &[],
                lines_len: 0,
            },
            Block {
                title: "## Goal".to_string(),
                lead: None,
                lines: &self.goal,
                lines_len: lines_len(&self.goal),
            },
        ];
        if !self.completed.is_empty() {
            let omitted = plan.completed_omitted.min(self.completed.len());
            blocks.push(Block {
                title: "## Completed steps".to_string(),
                lead: (omitted > 0)
                    .then(|| format!("({omitted} earlier completed steps omitted)")),
                lines: &self.completed[omitted..],
                lines_len: self.completed_prefix[self.completed.len()]
                    - self.completed_prefix[omitted],
            });
        }
        if !self.pending.is_empty() {
            blocks.push(if plan.pending_collapsed {
                Block {
                    title: "## Pending steps".to_string(),
                    lead: Some(format!("{} pending steps remain", self.pending.len())),
                    lines: &[],
                    lines_len: 0,
                }
            } else {
                Block {
                    title: "## Pending steps".to_string(),
                    lead: None,
                    lines: &self.pending,
                    lines_len: lines_len(&self.pending),
                }
            });
        }
        if !self.files.is_empty() {
            let omitted = plan.files_omitted.min(self.files.len());
            blocks.push(Block {
                title: "## Modified files".to_string(),
                lead: (omitted > 0).then(|| format!("({omitted} earlier files omitted)")),
                lines: &self.files[omitted..],
                lines_len: self.files_prefix[self.files.len()] - self.files_prefix[omitted],
            });
        }
        if !self.variables.is_empty() && !plan.variables_dropped {
            blocks.push(Block {
                title: "## Variables".to_string(),
                lead: None,
                lines: &self.variables,
                lines_len: lines_len(&self.variables),
            });
        }
        blocks
    }

    fn measure(&self, plan: &Truncation) -> usize {
        let blocks = self.blocks(plan);
        let separators = blocks.len().saturating_sub(1);
        blocks.iter().map(Block::len).sum::<usize>() + separators
    }

    fn render(&self, plan: &Truncation) -> String {
        let mut out = String::with_capacity(self.measure(plan));
        for (position, block) in self.blocks(plan).iter().enumerate() {
            if position > 0 {
                out.push('\n');
            }
            block.write_to(&mut out);
        }
        out
    }
}

fn prefix_lengths(lines: &[String]) -> Vec<usize> {
    let mut prefix = Vec::with_capacity(lines.len() + 1);
    let mut total = 0;
    prefix.push(total);
    for line in lines {
        total += line.len() + 1;
        prefix.push(total);
    }
    prefix
}

fn lines_len(lines: &[String]) -> usize {
    lines.iter().map(|line| line.len() + 1).sum()
}
