use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::context::StepContext;
use crate::error::VibleError;

/// Failure raised by a step body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Retried according to the run's retry policy.
    #[error("transient: {0}")]
    Transient(String),

    /// Fails the run without further attempts.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl StepError {
    pub fn transient(msg: impl std::fmt::Display) -> Self {
        Self::Transient(msg.to_string())
    }

    pub fn permanent(msg: impl std::fmt::Display) -> Self {
        Self::Permanent(msg.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<VibleError> for StepError {
    fn from(e: VibleError) -> Self {
        match e {
            VibleError::NotFound(_) | VibleError::Validation(_) => Self::Permanent(e.to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Boxed future returned by a step body.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, StepError>> + Send>>;

/// Type-erased step body.
pub type StepHandler = Arc<dyn Fn(StepContext) -> StepFuture + Send + Sync>;

/// Computes the wake time of a sleep step.
pub type WakeFn = Arc<dyn Fn(&StepContext) -> DateTime<Utc> + Send + Sync>;

/// What a step does when executed.
#[derive(Clone)]
pub enum StepKind {
    /// Run a body once and memoize its output.
    Run(StepHandler),
    /// Suspend the run until the computed time.
    Sleep(WakeFn),
}

/// A named step of a workflow definition.
#[derive(Clone)]
pub struct StepDef {
    pub name: String,
    pub kind: StepKind,
}

impl StepDef {
    pub fn is_sleep(&self) -> bool {
        matches!(self.kind, StepKind::Sleep(_))
    }
}

impl std::fmt::Debug for StepDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            StepKind::Run(_) => "run",
            StepKind::Sleep(_) => "sleep",
        };
        f.debug_struct("StepDef")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Memoized outcome of a completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub run_id: Uuid,
    pub step_name: String,
    pub output: serde_json::Value,
    pub completed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct SleepOutput {
    wake_at: DateTime<Utc>,
}

impl StepResult {
    pub fn new(
        run_id: Uuid,
        step_name: impl Into<String>,
        output: serde_json::Value,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            step_name: step_name.into(),
            output,
            completed_at,
        }
    }

    /// Result of a sleep step, recording when the run may continue.
    pub fn sleep(
        run_id: Uuid,
        step_name: impl Into<String>,
        wake_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let output = serde_json::json!({ "wake_at": wake_at });
        Self::new(run_id, step_name, output, completed_at)
    }

    /// Wake time recorded by a sleep step.
    pub fn wake_at(&self) -> Option<DateTime<Utc>> {
        recorded_wake_at(&self.output)
    }
}

/// Wake time stored in a sleep step's output.
pub fn recorded_wake_at(output: &serde_json::Value) -> Option<DateTime<Utc>> {
    SleepOutput::deserialize(output).ok().map(|s| s.wake_at)
}
