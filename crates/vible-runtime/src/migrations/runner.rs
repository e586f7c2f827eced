//! Applies embedded SQL migrations under a PostgreSQL advisory lock so that
//! several processes starting together do not race.

use std::collections::HashSet;

use sqlx::PgPool;
use tracing::{debug, info, warn};

use vible_core::error::{Result, VibleError};

/// Advisory lock key ("VIBLE" in ascii).
const MIGRATION_LOCK_ID: i64 = 0x5649424C45;

/// A named SQL script.
#[derive(Debug, Clone)]
pub struct Migration {
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Migrations shipped with the runtime, in order.
pub fn builtin_migrations() -> Vec<Migration> {
    vec![Migration::new(
        "0001_vible_core",
        include_str!("../../migrations/0001_vible_core.sql"),
    )]
}

pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply every builtin migration not yet recorded.
    ///
    /// The advisory lock is session scoped, so it is taken and released on
    /// one pinned connection.
    pub async fn run(&self) -> Result<Vec<String>> {
        let mut lock_conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *lock_conn)
            .await
            .map_err(|e| VibleError::Database(format!("Failed to acquire migration lock: {}", e)))?;
        debug!("Migration lock acquired");

        let result = self.apply_pending(builtin_migrations()).await;

        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *lock_conn)
            .await
        {
            warn!(error = %e, "Failed to release migration lock");
        }

        result
    }

    async fn apply_pending(&self, migrations: Vec<Migration>) -> Result<Vec<String>> {
        self.ensure_migrations_table().await?;

        let applied = self.applied_migrations().await?;
        debug!(applied = ?applied, "Loaded migration history");

        let mut newly_applied = Vec::new();
        for migration in migrations {
            if applied.contains(&migration.name) {
                continue;
            }
            self.apply(&migration).await?;
            newly_applied.push(migration.name);
        }
        Ok(newly_applied)
    }

    async fn ensure_migrations_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vible_migrations (
                name VARCHAR(255) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| VibleError::Database(format!("Failed to create migrations table: {}", e)))?;
        Ok(())
    }

    async fn applied_migrations(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM vible_migrations")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VibleError::Database(format!("Failed to read migrations: {}", e)))?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn apply(&self, migration: &Migration) -> Result<()> {
        info!(migration = %migration.name, "Applying migration");

        let mut tx = self.pool.begin().await?;
        for statement in split_sql_statements(&migration.sql) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    VibleError::Database(format!(
                        "Failed to apply migration '{}': {}",
                        migration.name, e
                    ))
                })?;
        }
        sqlx::query("INSERT INTO vible_migrations (name) VALUES ($1)")
            .bind(&migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(migration = %migration.name, "Migration applied");
        Ok(())
    }
}

/// Split a script on top-level semicolons, skipping `--` comments and
/// semicolons inside single-quoted literals.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;

    for line in sql.lines() {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if !in_string && c == '-' && chars.peek() == Some(&'-') {
                break;
            }
            match c {
                '\'' => {
                    in_string = !in_string;
                    current.push(c);
                }
                ';' if !in_string => {
                    let statement = current.trim();
                    if !statement.is_empty() {
                        statements.push(statement.to_string());
                    }
                    current.clear();
                }
                _ => current.push(c),
            }
        }
        current.push('\n');
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}
