//! CLI entry point for agent-thread.

use clap::{Args, Parser, Subcommand};

use crate::config::ApiFlavor;

/// Agent thread CLI
#[derive(Parser, Debug)]
#[command(
    name = "agent-thread",
    version,
    about = "Run browser-agent turns from the terminal"
)]
pub struct Cli {
    /// Log at debug level unless AGENT_THREAD_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one turn and print its events
    Run(RunArgs),
    /// Split a request into a checklist
    Checklist(ChecklistArgs),
}

/// Settings overrides shared by every command.
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Model to use instead of the configured task model
    #[arg(short, long)]
    pub model: Option<String>,

    /// Completion surface (messages or responses)
    #[arg(long)]
    pub flavor: Option<ApiFlavor>,

    /// Max output tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// System prompt replacing the generated one
    #[arg(short, long)]
    pub system: Option<String>,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Resume this thread instead of starting a new one
    #[arg(long)]
    pub thread: Option<String>,

    /// URL of the tab the turn runs against
    #[arg(long)]
    pub tab_url: Option<String>,

    /// Title of the tab the turn runs against
    #[arg(long)]
    pub tab_title: Option<String>,

    /// Print events as JSON lines instead of the final response
    #[arg(long)]
    pub json: bool,

    /// User prompt
    pub prompt: String,
}

/// Arguments for the `checklist` subcommand.
#[derive(Args, Debug)]
pub struct ChecklistArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// User request to split
    pub prompt: String,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
