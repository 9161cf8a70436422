//! Command-line argument models for the agbridge binary.
//!
//! Every flag has an `AGBRIDGE_*` environment fallback so the bridge can be
//! configured from a shell profile.

pub mod cli_args;
pub mod cli_types;

pub use cli_args::{join_prompt, Cli, Command, SessionsCommand, DEFAULT_API_BASE, DEFAULT_MODEL};
pub use cli_types::*;
