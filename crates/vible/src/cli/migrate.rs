use anyhow::Result;
use clap::Parser;

use vible_runtime::{Database, MigrationRunner};

use super::{init_tracing, load_config};

/// Apply pending database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "vible.toml")]
    pub config: String,
}

impl MigrateCommand {
    pub async fn execute(self) -> Result<()> {
        let config = load_config(&self.config)?;
        init_tracing(&config.observability.logging, false);

        if !config.database.is_configured() {
            anyhow::bail!("database.url is not set in {}", self.config);
        }

        let db = Database::from_config(&config.database).await?;
        let applied = MigrationRunner::new(db.pool().clone()).run().await?;

        if applied.is_empty() {
            println!("Database is up to date");
        } else {
            for name in &applied {
                println!("Applied {}", name);
            }
        }

        db.close().await;
        Ok(())
    }
}
