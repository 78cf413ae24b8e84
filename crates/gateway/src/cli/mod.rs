pub mod client;
pub mod export;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use ag_domain::config::Config;
use ag_domain::error::{Error, Result};

/// Aragora — a multi-agent debate platform.
#[derive(Debug, Parser)]
#[command(name = "aragora", version, about)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "aragora.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Serve,
    /// Start a debate via a running server and wait for the outcome.
    Start {
        /// The task to debate.
        #[arg(long)]
        task: String,
        /// Comma-separated agent identifiers (e.g. "openai/gpt-4o,anthropic").
        #[arg(long)]
        agents: String,
        /// Rounds to plan (server default when omitted).
        #[arg(long)]
        rounds: Option<u32>,
        /// Consensus policy: majority, supermajority, unanimous, judge, weighted.
        #[arg(long)]
        policy: Option<String>,
        /// Server base URL.
        #[arg(long, default_value = "http://127.0.0.1:8300")]
        server: String,
        /// Bearer token (when the server enforces auth).
        #[arg(long)]
        token: Option<String>,
    },
    /// Print a debate's durable event log.
    Replay {
        /// Debate id or slug.
        debate: String,
        #[arg(long, default_value = "http://127.0.0.1:8300")]
        server: String,
        #[arg(long)]
        token: Option<String>,
    },
    /// Export a debate transcript.
    Export {
        /// Debate id or slug.
        debate: String,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Output path; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = "http://127.0.0.1:8300")]
        server: String,
        #[arg(long)]
        token: Option<String>,
    },
    /// Mint a signed bearer token (reads the HMAC key from the environment).
    Token {
        /// Token subject (user or service name).
        #[arg(long)]
        subject: String,
        /// Time to live in seconds (config default when omitted).
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
    Html,
}

/// Load the TOML config (missing file = defaults) and overlay the
/// environment variables.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
    } else {
        Config::default()
    };
    config.apply_env();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_start_command() {
        let cli = Cli::parse_from([
            "aragora", "start", "--task", "pick x", "--agents", "a,b", "--rounds", "2",
            "--policy", "unanimous",
        ]);
        match cli.command {
            Some(Command::Start { task, agents, rounds, policy, .. }) => {
                assert_eq!(task, "pick x");
                assert_eq!(agents, "a,b");
                assert_eq!(rounds, Some(2));
                assert_eq!(policy.as_deref(), Some("unanimous"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::parse_from(["aragora"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let config = load_config(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config.server.port, 8300);
    }
}
