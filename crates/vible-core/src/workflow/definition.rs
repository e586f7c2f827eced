use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::context::StepContext;
use super::retry::RetryPolicy;
use super::step::{StepDef, StepError, StepKind};
use crate::cron::CronTrigger;
use crate::error::{Result, VibleError};

/// What starts a new run of a definition.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Every published event with this name.
    Event(String),
    /// Every occurrence of a cron schedule.
    Cron(CronTrigger),
}

/// An ordered list of named steps plus the trigger that starts it.
///
/// Definitions are registered once at startup and never change afterwards.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    id: String,
    trigger: Trigger,
    steps: Vec<StepDef>,
    retry: Option<RetryPolicy>,
    step_timeout: Option<Duration>,
}

impl WorkflowDefinition {
    /// Definition started by events named `event_name`.
    pub fn on_event(id: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self::new(id, Trigger::Event(event_name.into()))
    }

    /// Definition started on a cron schedule.
    pub fn on_cron(id: impl Into<String>, trigger: CronTrigger) -> Self {
        Self::new(id, Trigger::Cron(trigger))
    }

    fn new(id: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: id.into(),
            trigger,
            steps: Vec::new(),
            retry: None,
            step_timeout: None,
        }
    }

    /// Append a step whose serialized output is memoized under `name`.
    pub fn step<F, Fut, T>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, StepError>> + Send + 'static,
        T: Serialize + 'static,
    {
        let f = Arc::new(f);
        let handler = Arc::new(move |ctx: StepContext| {
            let fut = f(ctx);
            Box::pin(async move {
                let output = fut.await?;
                serde_json::to_value(output).map_err(StepError::permanent)
            }) as super::step::StepFuture
        });
        self.steps.push(StepDef {
            name: name.into(),
            kind: StepKind::Run(handler),
        });
        self
    }

    /// Append a step that suspends the run for `duration`.
    pub fn sleep(self, name: impl Into<String>, duration: Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        self.sleep_until(name, move |ctx| {
            ctx.now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Append a step that suspends the run until the computed instant.
    pub fn sleep_until<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StepContext) -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.steps.push(StepDef {
            name: name.into(),
            kind: StepKind::Sleep(Arc::new(f)),
        });
        self
    }

    /// Override the executor's default retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Override the executor's default step timeout.
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn steps(&self) -> &[StepDef] {
        &self.steps
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.step_timeout
    }

    /// Event name for event-triggered definitions.
    pub fn event_name(&self) -> Option<&str> {
        match &self.trigger {
            Trigger::Event(name) => Some(name),
            Trigger::Cron(_) => None,
        }
    }

    /// Step names key memoization, so they must be unique.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(VibleError::Config("workflow id must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(VibleError::Config(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(VibleError::Config(format!(
                    "workflow '{}' declares step '{}' twice",
                    self.id, step.name
                )));
            }
        }
        Ok(())
    }
}
