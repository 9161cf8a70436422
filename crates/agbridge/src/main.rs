mod auth_commands;
mod bootstrap_helpers;
mod runtime_config;
mod send_command;
mod session_commands;

use agbridge_cli::{Cli, Command, SessionsCommand};
use agbridge_session::SessionParser;
use anyhow::Result;
use clap::Parser;

use crate::auth_commands::{execute_login, execute_logout, execute_status};
use crate::bootstrap_helpers::init_tracing;
use crate::runtime_config::{context_builder, credential_store, oauth_flow, session_discovery};
use crate::send_command::{execute_send, resolve_prompt, SendArgs};
use crate::session_commands::{
    execute_context_preview, execute_sessions_list, execute_sessions_show,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}

async fn run_cli(cli: Cli) -> Result<()> {
    let mut stdout = std::io::stdout();
    match &cli.command {
        Command::Sessions { command } => {
            let discovery = session_discovery(&cli);
            match command {
                SessionsCommand::List { json } => {
                    execute_sessions_list(&discovery, *json, &mut stdout)
                }
                SessionsCommand::Show { id, json } => execute_sessions_show(
                    &discovery,
                    &SessionParser::new(),
                    id.as_deref(),
                    *json,
                    &mut stdout,
                ),
            }
        }
        Command::Context { session } => execute_context_preview(
            &session_discovery(&cli),
            &SessionParser::new(),
            &context_builder(&cli),
            session.as_deref(),
            &mut stdout,
        ),
        Command::Send {
            prompt,
            session,
            no_context,
            account,
            max_output_tokens,
            temperature,
        } => {
            let args = SendArgs {
                prompt: resolve_prompt(prompt)?,
                session: session.clone(),
                no_context: *no_context,
                account: account.clone(),
                max_output_tokens: *max_output_tokens,
                temperature: *temperature,
            };
            execute_send(&cli, &args, &mut stdout).await
        }
        Command::Login { headless } => {
            execute_login(&oauth_flow(&cli)?, *headless, &mut stdout).await
        }
        Command::Logout { account } => {
            execute_logout(&oauth_flow(&cli)?, account.as_deref(), &mut stdout).await
        }
        Command::Status { account } => {
            execute_status(&credential_store(&cli), account.as_deref(), &mut stdout)
        }
    }
}
