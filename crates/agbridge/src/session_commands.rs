use std::io::Write;

use agbridge_session::{
    redact_variables, ContextBuilder, ParsedSession, SessionDiscovery, SessionMetadata,
    SessionParser,
};
use anyhow::{bail, Context, Result};

fn roots_label(discovery: &SessionDiscovery) -> String {
    let roots = discovery
        .roots()
        .iter()
        .map(|root| root.display().to_string())
        .collect::<Vec<_>>();
    if roots.is_empty() {
        "<no search roots>".to_string()
    } else {
        roots.join(", ")
    }
}

/// Picks the named session, or the most recent one when no id is given.
pub(crate) fn resolve_session(
    discovery: &SessionDiscovery,
    id: Option<&str>,
) -> Result<SessionMetadata> {
    match id {
        Some(id) => match discovery.by_id(id) {
            Some(metadata) => Ok(metadata),
            None => bail!(
                "no session with id '{id}' under {}; run 'agbridge sessions list'",
                roots_label(discovery)
            ),
        },
        None => match discovery.latest() {
            Some(metadata) => Ok(metadata),
            None => bail!(
                "no sessions found under {}; set --sessions-dir or AGBRIDGE_SESSIONS_DIR",
                roots_label(discovery)
            ),
        },
    }
}

pub(crate) fn load_session(
    discovery: &SessionDiscovery,
    parser: &SessionParser,
    id: Option<&str>,
) -> Result<ParsedSession> {
    let metadata = resolve_session(discovery, id)?;
    parser
        .parse(&metadata.path)
        .with_context(|| format!("failed to load session '{}'", metadata.id))
}

pub(crate) fn execute_sessions_list(
    discovery: &SessionDiscovery,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let sessions = discovery.discover();
    if json {
        serde_json::to_writer_pretty(&mut *out, &sessions)
            .context("failed to encode session list")?;
        writeln!(out)?;
        return Ok(());
    }
    if sessions.is_empty() {
        writeln!(out, "no sessions found under {}", roots_label(discovery))?;
        return Ok(());
    }
    for session in &sessions {
        writeln!(
            out,
            "{:<36} {:<16} {:>9} bytes  {}",
            session.id,
            session.age,
            session.size,
            session.path.display()
        )?;
    }
    Ok(())
}

pub(crate) fn execute_sessions_show(
    discovery: &SessionDiscovery,
    parser: &SessionParser,
    id: Option<&str>,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let mut session = load_session(discovery, parser, id)?;
    session.variables = redact_variables(&session.variables);
    if json {
        serde_json::to_writer_pretty(&mut *out, &session).context("failed to encode session")?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "session: {}", session.id)?;
    writeln!(out, "format: {}", session.version.as_str())?;
    if session.partial {
        writeln!(out, "partial: yes (recovered by a fallback recognizer)")?;
    }
    writeln!(out, "goal: {}", session.goal)?;
    writeln!(
        out,
        "steps: {} total, {} completed",
        session.plan_steps.len(),
        session.completed.len()
    )?;
    for step in &session.plan_steps {
        writeln!(
            out,
            "  [{}] {} ({})",
            step.index,
            step.action,
            step.status.as_str()
        )?;
    }
    if !session.modified_files.is_empty() {
        writeln!(out, "modified files:")?;
        for file in &session.modified_files {
            writeln!(out, "  {file}")?;
        }
    }
    if !session.variables.is_empty() {
        writeln!(out, "variables:")?;
        for (key, value) in &session.variables {
            writeln!(out, "  {key} = {value}")?;
        }
    }
    Ok(())
}

pub(crate) fn execute_context_preview(
    discovery: &SessionDiscovery,
    parser: &SessionParser,
    builder: &ContextBuilder,
    id: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let session = load_session(discovery, parser, id)?;
    writeln!(out, "{}", builder.build(&session))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use agbridge_session::{ContextBuilder, SessionDiscovery, SessionParser};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::{
        execute_context_preview, execute_sessions_list, execute_sessions_show, resolve_session,
    };

    fn fixture() -> (TempDir, SessionDiscovery) {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join("alpha.json"),
            json!({
                "schemaVersion": 2,
                "task": {
                    "id": "alpha",
                    "goal": "Ship the parser",
                    "steps": [
                        {"index": 1, "action": "write tests", "status": "completed"},
                        {"index": 2, "action": "implement", "status": "pending"}
                    ]
                },
                "variables": {"db_password": "hunter2", "branch": "main"}
            })
            .to_string(),
        )
        .expect("write alpha");
        let discovery = SessionDiscovery::with_roots(vec![dir.path().to_path_buf()]);
        (dir, discovery)
    }

    #[test]
    fn functional_sessions_list_json_is_machine_readable() {
        let (_dir, discovery) = fixture();
        let mut out = Vec::new();
        execute_sessions_list(&discovery, true, &mut out).expect("list");
        let listed: Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(listed[0]["id"], "alpha");
        assert!(listed[0]["size"].as_u64().unwrap_or(0) > 0);
    }

    #[test]
    fn functional_sessions_show_redacts_secret_variables() {
        let (_dir, discovery) = fixture();
        let parser = SessionParser::new();

        let mut text = Vec::new();
        execute_sessions_show(&discovery, &parser, Some("alpha"), false, &mut text).expect("show");
        let text = String::from_utf8(text).expect("utf8");
        assert!(text.contains("goal: Ship the parser"));
        assert!(text.contains("[2] implement (pending)"));
        assert!(!text.contains("hunter2"));

        let mut raw = Vec::new();
        execute_sessions_show(&discovery, &parser, None, true, &mut raw).expect("show json");
        let shown: Value = serde_json::from_slice(&raw).expect("json");
        assert_eq!(shown["version"], "v2");
        assert_ne!(shown["variables"]["db_password"], "hunter2");
        assert_eq!(shown["variables"]["branch"], "main");
    }

    #[test]
    fn functional_context_preview_prints_injected_block() {
        let (_dir, discovery) = fixture();
        let mut out = Vec::new();
        execute_context_preview(
            &discovery,
            &SessionParser::new(),
            &ContextBuilder::default(),
            None,
            &mut out,
        )
        .expect("preview");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("# Resumed session alpha"));
    }

    #[test]
    fn regression_unknown_or_missing_sessions_give_actionable_errors() {
        let (_dir, discovery) = fixture();
        let error = resolve_session(&discovery, Some("nope")).expect_err("unknown id");
        assert!(error.to_string().contains("agbridge sessions list"));

        let empty = TempDir::new().expect("tempdir");
        let discovery = SessionDiscovery::with_roots(vec![empty.path().to_path_buf()]);
        let error = resolve_session(&discovery, None).expect_err("no sessions");
        assert!(error.to_string().contains("AGBRIDGE_SESSIONS_DIR"));
        let mut out = Vec::new();
        execute_sessions_list(&discovery, false, &mut out).expect("list");
        assert!(String::from_utf8(out)
            .expect("utf8")
            .starts_with("no sessions found"));
    }
}
