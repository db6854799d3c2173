//! Command-line interface for Gaoler
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Gaoler - FreeBSD jail lifecycle orchestrator
#[derive(Parser)]
#[command(name = "gaoler")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "gaoler.toml")]
    pub config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Bring jails online (networking, jail creation, mounts, /etc/rc)
    Start {
        /// Specific jail to start
        jail: Option<String>,

        /// Start all jails (required if no jail specified)
        #[arg(long, conflicts_with = "jail")]
        all: bool,
    },

    /// Take jails offline
    Stop {
        /// Specific jail to stop
        jail: Option<String>,

        /// Stop all jails (required if no jail specified)
        #[arg(long, conflicts_with = "jail")]
        all: bool,
    },

    /// Stop then start jails
    Restart {
        /// Specific jail to restart
        jail: Option<String>,

        /// Restart all jails (required if no jail specified)
        #[arg(long, conflicts_with = "jail")]
        all: bool,
    },

    /// Show whether jails are online
    Status {
        /// Specific jail (all jails if omitted)
        jail: Option<String>,
    },

    /// Validate the configuration file
    Check,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "gaoler", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_start() {
        let cli = Cli::try_parse_from(["gaoler", "-vv", "start", "web1"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("gaoler.toml"));
        match cli.command {
            Commands::Start { jail, all } => {
                assert_eq!(jail.as_deref(), Some("web1"));
                assert!(!all);
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_all_conflicts_with_jail() {
        assert!(Cli::try_parse_from(["gaoler", "stop", "web1", "--all"]).is_err());
    }
}
