use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::CliKeySource;

pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_temperature(value: &str) -> Result<f32, String> {
    let parsed = value
        .parse::<f32>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || !(0.0..=2.0).contains(&parsed) {
        return Err("value must be a finite number in range 0.0..=2.0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "agbridge",
    about = "Carry IDE agent sessions into a Gemini-backed command-line assistant",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "AGBRIDGE_MODEL",
        default_value = DEFAULT_MODEL,
        global = true,
        help = "Model name sent to the generateContent endpoint"
    )]
    pub model: String,

    #[arg(
        long = "api-base",
        env = "AGBRIDGE_API_BASE",
        default_value = DEFAULT_API_BASE,
        global = true,
        help = "Base URL of the Gemini API"
    )]
    pub api_base: String,

    #[arg(
        long = "config-dir",
        env = "AGBRIDGE_CONFIG_DIR",
        global = true,
        help = "Directory holding encrypted credentials (defaults to the platform config dir)"
    )]
    pub config_dir: Option<PathBuf>,

    #[arg(
        long = "sessions-dir",
        env = "AGBRIDGE_SESSIONS_DIR",
        global = true,
        help = "Session store directory to scan instead of the platform default"
    )]
    pub sessions_dir: Option<PathBuf>,

    #[arg(
        long = "oauth-client-id",
        env = "AGBRIDGE_OAUTH_CLIENT_ID",
        global = true,
        help = "OAuth desktop client id used by login"
    )]
    pub oauth_client_id: Option<String>,

    #[arg(
        long = "oauth-client-secret",
        env = "AGBRIDGE_OAUTH_CLIENT_SECRET",
        global = true,
        hide_env_values = true,
        help = "OAuth client secret, when the client type requires one"
    )]
    pub oauth_client_secret: Option<String>,

    #[arg(
        long = "oauth-callback-timeout-secs",
        env = "AGBRIDGE_OAUTH_CALLBACK_TIMEOUT_SECS",
        default_value_t = 300,
        value_parser = parse_positive_u64,
        global = true,
        help = "Seconds to wait for the browser redirect during login"
    )]
    pub oauth_callback_timeout_secs: u64,

    #[arg(
        long = "key-source",
        env = "AGBRIDGE_KEY_SOURCE",
        value_enum,
        default_value = "auto",
        global = true,
        help = "Where the credential encryption key comes from"
    )]
    pub key_source: CliKeySource,

    #[arg(
        long = "request-timeout-ms",
        env = "AGBRIDGE_REQUEST_TIMEOUT_MS",
        default_value_t = 120_000,
        value_parser = parse_positive_u64,
        global = true,
        help = "HTTP timeout for model requests in milliseconds"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "max-retries",
        env = "AGBRIDGE_MAX_RETRIES",
        default_value_t = 2,
        global = true,
        help = "Retries for retryable model request failures (429, 5xx, transport)"
    )]
    pub max_retries: usize,

    #[arg(
        long = "max-context-tokens",
        env = "AGBRIDGE_MAX_CONTEXT_TOKENS",
        default_value_t = 12_500,
        value_parser = parse_positive_usize,
        global = true,
        help = "Token budget for the injected session context"
    )]
    pub max_context_tokens: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List or inspect discovered IDE sessions.
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
    /// Print the context block that would be injected.
    Context {
        #[arg(long, help = "Session id (defaults to the most recent session)")]
        session: Option<String>,
    },
    /// Send a prompt with session context and stream the reply as SSE frames.
    Send {
        #[arg(required = true, num_args = 1.., help = "Prompt text; '-' reads stdin")]
        prompt: Vec<String>,
        #[arg(long, help = "Session id (defaults to the most recent session)")]
        session: Option<String>,
        #[arg(long = "no-context", help = "Send the prompt without session context")]
        no_context: bool,
        #[arg(long, help = "Account email (defaults to the active account)")]
        account: Option<String>,
        #[arg(long = "max-output-tokens")]
        max_output_tokens: Option<u32>,
        #[arg(long, value_parser = parse_temperature)]
        temperature: Option<f32>,
    },
    /// Sign in with Google OAuth.
    Login {
        #[arg(long, help = "Paste the redirect URL instead of running a local listener")]
        headless: bool,
    },
    /// Revoke and delete stored credentials.
    Logout {
        #[arg(long, help = "Account email (defaults to the active account)")]
        account: Option<String>,
    },
    /// Show sign-in state, token expiry and key source.
    Status {
        #[arg(long, help = "Account email (defaults to the active account)")]
        account: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List sessions, newest first.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show the parsed contents of one session.
    Show {
        #[arg(help = "Session id (defaults to the most recent session)")]
        id: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

/// Joins prompt words into one prompt, rejecting an all-blank result.
pub fn join_prompt(words: &[String]) -> Result<String> {
    let prompt = words.join(" ");
    if prompt.trim().is_empty() {
        bail!("prompt is empty");
    }
    Ok(prompt)
}
