use anyhow::Result;
use clap::Parser;
use tracing::info;

use vible::Vible;

use super::{init_tracing, load_config};

/// Run the Vible server.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "vible.toml")]
    pub config: String,

    /// Port to listen on (overrides config).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Verbose logging.
    #[arg(long)]
    pub dev: bool,
}

impl RunCommand {
    pub async fn execute(self) -> Result<()> {
        let mut config = load_config(&self.config)?;
        init_tracing(&config.observability.logging, self.dev);
        info!(config = %self.config, "Configuration loaded");

        if let Some(port) = self.port {
            config.gateway.port = port;
        }

        let vible = Vible::builder().config(config).build()?;
        vible.run().await?;
        Ok(())
    }
}
