pub mod agent;
pub mod client;
pub mod commands;
pub mod format;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use agent::AgentFile;
use client::IdentityClient;

#[derive(Parser)]
#[command(name = "idm-admin")]
#[command(about = "Identity manager administration client")]
#[command(version)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "IDM_URL",
        help = "Identity server URL (defaults to the agent file's)"
    )]
    pub url: Option<String>,

    #[arg(
        short = 'a',
        long = "agent",
        global = true,
        env = "IDM_AGENT_FILE",
        help = "Agent credential file"
    )]
    pub agent: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Show a user or agent identity")]
    Show(commands::show::ShowArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Failure of a client command. Usage errors exit with status 2, every
/// other failure with status 1.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Operational(#[from] anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::Operational(_) => 1,
        }
    }
}

/// Run a parsed command and return what it prints on stdout.
pub async fn run(cli: Cli) -> Result<String, CliError> {
    match cli.command {
        Commands::Show(args) => {
            let lookup = args.lookup()?;
            let client = connect(cli.url.as_deref(), cli.agent.as_deref())?;
            Ok(commands::show::handle(&client, lookup, args.format).await?)
        }
    }
}

/// Build a signing client from the agent file and optional server URL.
pub fn connect(url: Option<&str>, agent_file: Option<&Path>) -> anyhow::Result<IdentityClient> {
    let path = agent_file.context("no agent file specified (use --agent or set IDM_AGENT_FILE)")?;
    let agent = AgentFile::load(path)?;
    let entry = agent.agent_for(url)?;
    let key = agent.signing_key()?;

    let url = url.unwrap_or(&entry.url);
    tracing::debug!("Connecting to {} as {}", url, entry.username);
    Ok(IdentityClient::new(url, &entry.username, key)?)
}
