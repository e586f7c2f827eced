mod database;
mod observability;

pub use database::DatabaseConfig;
pub use observability::{LoggingConfig, ObservabilityConfig};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VibleError};
use crate::workflow::{BackoffStrategy, RetryPolicy};

/// Root configuration, usually read from `vible.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VibleConfig {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Workflow scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Step executor configuration.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Outbound email configuration.
    #[serde(default)]
    pub email: EmailConfig,

    /// Application settings used by workflow templates.
    #[serde(default)]
    pub app: AppConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl VibleConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VibleError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| VibleError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.executor.max_concurrent_runs == 0 {
            return Err(VibleError::Config(
                "executor.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if self.executor.max_attempts == 0 {
            return Err(VibleError::Config(
                "executor.max_attempts must be at least 1".into(),
            ));
        }

        if self.scheduler.poll_interval_ms == 0 {
            return Err(VibleError::Config(
                "scheduler.poll_interval_ms must be positive".into(),
            ));
        }
        if self.scheduler.stale_after_secs == 0 {
            return Err(VibleError::Config(
                "scheduler.stale_after_secs must be positive".into(),
            ));
        }
        if self.email.provider == EmailProvider::Http && self.email.endpoint.is_none() {
            return Err(VibleError::Config(
                "email.endpoint is required when provider = \"http\"".into(),
            ));
        }
        Ok(())
    }
}

/// Project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

fn default_project_name() -> String {
    "vible".to_string()
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP port.
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Allowed CORS origins (`*` allows any).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Interval between SSE keep-alive comments.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Frames buffered per live stream before pushes are dropped.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            cors_origins: default_cors_origins(),
            keep_alive_secs: default_keep_alive(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_http_port() -> u16 {
    4000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_keep_alive() -> u64 {
    15
}

fn default_stream_buffer() -> usize {
    64
}

/// Workflow scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum sleeping runs resumed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pending or Running runs untouched for this long are handed back to
    /// the workers. Must exceed the longest step including its retries.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            batch_size: default_batch_size(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_stale_after() -> u64 {
    600
}

/// Step executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Runs advanced concurrently.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Default per-step timeout in seconds.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Default attempts per step, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on retry delay, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl ExecutorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Default retry policy for definitions that do not set their own.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: BackoffStrategy::Exponential,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            step_timeout_secs: default_step_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_concurrent_runs() -> usize {
    16
}

fn default_step_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    60_000
}

/// Which email sender to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    /// Write emails to the log only.
    #[default]
    Log,
    /// POST emails to an HTTP mail relay.
    Http,
}

/// Outbound email configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub provider: EmailProvider,

    /// Relay endpoint for the `http` provider.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token sent to the relay.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Sender address.
    #[serde(default = "default_from")]
    pub from: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: EmailProvider::default(),
            endpoint: None,
            api_key: None,
            from: default_from(),
        }
    }
}

fn default_from() -> String {
    "Vible <no-reply@vible.app>".to_string()
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Public URL of the web client, used in email links.
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            frontend_url: default_frontend_url(),
        }
    }
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

/// Substitute environment variables in the format ${VAR_NAME}.
///
/// Unset variables are left as-is.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => result = result.replace(&cap[0], &value),
            Err(_) => tracing::warn!(var = var_name, "Config references unset variable"),
        }
    }

    result
}
