mod migrate;
mod run;

pub use migrate::MigrateCommand;
pub use run::RunCommand;

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vible_core::config::{LoggingConfig, VibleConfig};

/// Vible backend server.
#[derive(Parser)]
#[command(name = "vible")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the server, workflow worker and scheduler.
    Run(RunCommand),

    /// Apply database migrations.
    Migrate(MigrateCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Migrate(cmd) => cmd.execute().await,
        }
    }
}

/// Load `.env` and the config file.
fn load_config(path: &str) -> Result<VibleConfig> {
    dotenvy::dotenv().ok();

    if !Path::new(path).exists() {
        anyhow::bail!("Configuration file not found: {}", path);
    }
    Ok(VibleConfig::from_file(path)?)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig, dev: bool) {
    let default_level = if dev { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["vible", "run", "--port", "3000", "--dev"]).unwrap();
        match cli.command {
            Commands::Run(cmd) => {
                assert_eq!(cmd.config, "vible.toml");
                assert_eq!(cmd.port, Some(3000));
                assert!(cmd.dev);
            }
            Commands::Migrate(_) => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parse_migrate() {
        let cli = Cli::try_parse_from(["vible", "migrate", "--config", "prod.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate(ref cmd) if cmd.config == "prod.toml"));
    }

    #[test]
    fn test_missing_config_file() {
        assert!(load_config("does-not-exist.toml").is_err());
    }
}
