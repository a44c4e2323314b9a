//! Command line interface

use std::path::PathBuf;

use clap::Parser;

use super::constants::{ENV_CONFIG, ENV_DATABASE_URL};

/// Intake pipeline worker for service operations
#[derive(Debug, Parser)]
#[command(name = "serviceops", version, about)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// PostgreSQL connection URL (overrides the config file)
    #[arg(long = "db-url", env = ENV_DATABASE_URL)]
    pub db_url: Option<String>,

    /// Disable the poller (start, run migrations, idle until shutdown)
    #[arg(long)]
    pub no_poller: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["serviceops"]);
        assert!(cli.config.is_none());
        assert!(cli.db_url.is_none());
        assert!(!cli.no_poller);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "serviceops",
            "--config",
            "/etc/serviceops.json",
            "--db-url",
            "postgres://localhost/ops",
            "--no-poller",
        ]);
        assert_eq!(cli.config.unwrap(), PathBuf::from("/etc/serviceops.json"));
        assert_eq!(cli.db_url.as_deref(), Some("postgres://localhost/ops"));
        assert!(cli.no_poller);
    }
}
