use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use vible_core::config::ExecutorConfig;
use vible_core::error::{Result, VibleError};
use vible_core::store::RunStore;
use vible_core::workflow::{
    recorded_wake_at, RetryPolicy, StepContext, StepDef, StepError, StepHandler, StepKind, StepResult,
    WorkflowRun, WorkflowStatus,
};
use vible_core::Clock;

use super::registry::WorkflowRegistry;

/// Where a call to [`WorkflowExecutor::advance`] left the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step finished.
    Completed,
    /// Suspended by a sleep step.
    Sleeping { wake_at: DateTime<Utc> },
    /// A step failed permanently or ran out of attempts.
    Failed { error: String },
    /// Nothing to do: the run is terminal or still asleep.
    Skipped(WorkflowStatus),
}

/// Advances workflow runs step by step, memoizing each completed step.
pub struct WorkflowExecutor {
    registry: Arc<WorkflowRegistry>,
    runs: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    default_retry: RetryPolicy,
    default_timeout: Duration,
}

impl WorkflowExecutor {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        runs: Arc<dyn RunStore>,
        clock: Arc<dyn Clock>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            runs,
            clock,
            default_retry: config.retry_policy(),
            default_timeout: config.step_timeout(),
        }
    }

    /// Run as many steps as possible, starting at `current_step_index`.
    ///
    /// Steps with a recorded result are never invoked again; their stored
    /// output is reused. Store errors are returned and leave the run
    /// Running; the scheduler re-queues it once its lease runs out.
    pub async fn advance(&self, run_id: Uuid) -> Result<RunOutcome> {
        let mut run = self
            .runs
            .get_run(run_id)
            .await?
            .ok_or_else(|| VibleError::NotFound(format!("run {}", run_id)))?;

        let now = self.clock.now();
        if run.status.is_terminal() {
            return Ok(RunOutcome::Skipped(run.status));
        }
        if run.status == WorkflowStatus::Sleeping && !run.is_due(now) {
            return Ok(RunOutcome::Skipped(run.status));
        }

        let Some(definition) = self.registry.get(&run.definition_id) else {
            let error = format!("workflow '{}' is not registered", run.definition_id);
            tracing::error!(run_id = %run_id, "{}", error);
            run.fail(error.clone(), now);
            self.runs.update_run(run).await?;
            return Ok(RunOutcome::Failed { error });
        };

        run.start(now);
        self.runs.update_run(run.clone()).await?;

        let mut outputs: HashMap<String, serde_json::Value> = self
            .runs
            .step_results(run_id)
            .await?
            .into_iter()
            .map(|r| (r.step_name, r.output))
            .collect();

        let policy = definition
            .retry_policy()
            .cloned()
            .unwrap_or_else(|| self.default_retry.clone());
        let timeout = definition.timeout().unwrap_or(self.default_timeout);
        let steps = definition.steps();

        while run.current_step_index < steps.len() {
            let index = run.current_step_index;
            let step = &steps[index];

            if let Some(output) = outputs.get(&step.name) {
                tracing::debug!(run_id = %run_id, step = %step.name, "Step replayed from memo");
                let wake_at = cached_wake_at(step, output);
                let now = self.clock.now();
                run.advance_to(index + 1, now);
                if let Some(wake_at) = wake_at.filter(|w| *w > now) {
                    return self.suspend(run, wake_at, now).await;
                }
                self.runs.update_run(run.clone()).await?;
                continue;
            }

            match &step.kind {
                StepKind::Sleep(wake) => {
                    let now = self.clock.now();
                    let ctx = self.context(&run, &outputs, 1, now);
                    let result = StepResult::sleep(run_id, &step.name, wake(&ctx), now);
                    let stored = self.record(result).await?;
                    let wake_at = stored.wake_at();
                    outputs.insert(stored.step_name, stored.output);

                    run.advance_to(index + 1, now);
                    if let Some(wake_at) = wake_at.filter(|w| *w > now) {
                        return self.suspend(run, wake_at, now).await;
                    }
                    self.runs.update_run(run.clone()).await?;
                }
                StepKind::Run(handler) => {
                    match self
                        .run_step(&run, step, handler, &outputs, &policy, timeout)
                        .await
                    {
                        Ok(output) => {
                            let now = self.clock.now();
                            let stored = self
                                .record(StepResult::new(run_id, &step.name, output, now))
                                .await?;
                            outputs.insert(stored.step_name, stored.output);
                            run.advance_to(index + 1, now);
                            self.runs.update_run(run.clone()).await?;
                        }
                        Err(e) => {
                            let error = format!("step '{}' failed: {}", step.name, e);
                            tracing::error!(run_id = %run_id, step = %step.name, error = %e, "Run failed");
                            run.fail(error.clone(), self.clock.now());
                            self.runs.update_run(run).await?;
                            return Ok(RunOutcome::Failed { error });
                        }
                    }
                }
            }
        }

        run.complete(self.clock.now());
        self.runs.update_run(run).await?;
        tracing::info!(run_id = %run_id, workflow = %definition.id(), "Run completed");
        Ok(RunOutcome::Completed)
    }

    /// Invoke a step body with timeout and retry.
    async fn run_step(
        &self,
        run: &WorkflowRun,
        step: &StepDef,
        handler: &StepHandler,
        outputs: &HashMap<String, serde_json::Value>,
        policy: &RetryPolicy,
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, StepError> {
        let mut attempt = 1;
        loop {
            let ctx = self.context(run, outputs, attempt, self.clock.now());
            let error = match tokio::time::timeout(timeout, handler(ctx)).await {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e @ StepError::Permanent(_))) => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => StepError::Transient(format!("timed out after {:?}", timeout)),
            };

            if !policy.allows_retry(attempt) {
                return Err(error);
            }

            let delay = policy.backoff_for(attempt);
            tracing::warn!(
                run_id = %run.run_id,
                step = %step.name,
                attempt,
                delay = ?delay,
                error = %error,
                "Step failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Persist a step result, returning whichever result is stored.
    async fn record(&self, result: StepResult) -> Result<StepResult> {
        if self.runs.insert_step_result(result.clone()).await? {
            return Ok(result);
        }
        // Another worker got there first; its output wins.
        self.runs
            .step_results(result.run_id)
            .await?
            .into_iter()
            .find(|r| r.step_name == result.step_name)
            .ok_or_else(|| {
                VibleError::InvalidState(format!(
                    "step '{}' of run {} vanished",
                    result.step_name, result.run_id
                ))
            })
    }

    async fn suspend(
        &self,
        mut run: WorkflowRun,
        wake_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        tracing::debug!(run_id = %run.run_id, wake_at = %wake_at, "Run sleeping");
        run.suspend_until(wake_at, now);
        self.runs.update_run(run).await?;
        Ok(RunOutcome::Sleeping { wake_at })
    }

    fn context(
        &self,
        run: &WorkflowRun,
        outputs: &HashMap<String, serde_json::Value>,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> StepContext {
        StepContext {
            run_id: run.run_id,
            definition_id: run.definition_id.clone(),
            event: run.trigger_event.clone(),
            attempt,
            now,
            outputs: outputs.clone(),
        }
    }
}

/// Wake time recorded by an already-completed sleep step.
fn cached_wake_at(step: &StepDef, output: &serde_json::Value) -> Option<DateTime<Utc>> {
    if !step.is_sleep() {
        return None;
    }
    recorded_wake_at(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::TimeZone;
    use serde_json::json;
    use vible_core::workflow::{BackoffStrategy, WorkflowDefinition};
    use vible_core::{Event, ManualClock};

    use crate::store::MemoryStore;

    struct Harness {
        executor: WorkflowExecutor,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: BackoffStrategy::Fixed,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        }
    }

    fn harness(definitions: Vec<WorkflowDefinition>) -> Harness {
        let mut registry = WorkflowRegistry::new();
        for definition in definitions {
            registry.register(definition).unwrap();
        }
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap(),
        ));
        let executor = WorkflowExecutor::new(
            Arc::new(registry),
            store.clone(),
            clock.clone(),
            &ExecutorConfig::default(),
        );
        Harness {
            executor,
            store,
            clock,
        }
    }

    impl Harness {
        async fn start(&self, definition_id: &str, event: Event) -> Uuid {
            let run = WorkflowRun::new(definition_id, event, self.clock.now());
            let run_id = run.run_id;
            self.store.insert_run(run).await.unwrap();
            run_id
        }

        async fn run(&self, run_id: Uuid) -> WorkflowRun {
            self.store.get_run(run_id).await.unwrap().unwrap()
        }
    }

    fn counting_step(
        definition: WorkflowDefinition,
        name: &str,
        counter: Arc<AtomicU32>,
    ) -> WorkflowDefinition {
        definition.step(name, move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"ok": true}))
            }
        })
    }

    #[tokio::test]
    async fn test_runs_all_steps_in_order() {
        let def = WorkflowDefinition::on_event("chain", "x")
            .step("one", |_ctx| async { Ok(1) })
            .step("two", |ctx: StepContext| async move {
                let one: i64 = ctx.output_as("one")?;
                Ok(one + 1)
            });
        let h = harness(vec![def]);
        let run_id = h.start("chain", Event::new("x", json!({}))).await;

        assert_eq!(h.executor.advance(run_id).await.unwrap(), RunOutcome::Completed);

        let run = h.run(run_id).await;
        assert_eq!(run.status, WorkflowStatus::Completed);
        assert_eq!(run.current_step_index, 2);
        let results = h.store.step_results(run_id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.step_name == "two" && r.output == json!(2)));
    }

    #[tokio::test]
    async fn test_memoized_steps_are_not_reinvoked() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let third = Arc::new(AtomicU32::new(0));

        let def = WorkflowDefinition::on_event("memo", "x");
        let def = counting_step(def, "one", first.clone());
        let def = counting_step(def, "two", second.clone());
        let def = counting_step(def, "three", third.clone());
        let h = harness(vec![def]);
        let run_id = h.start("memo", Event::new("x", json!({}))).await;

        // A previous process completed steps one and two, then crashed
        // before moving the index.
        let now = h.clock.now();
        for name in ["one", "two"] {
            h.store
                .insert_step_result(StepResult::new(run_id, name, json!({"ok": true}), now))
                .await
                .unwrap();
        }
        let mut run = h.run(run_id).await;
        run.start(now);
        h.store.update_run(run).await.unwrap();

        assert_eq!(h.executor.advance(run_id).await.unwrap(), RunOutcome::Completed);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(third.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sleep_suspends_until_due() {
        let after = Arc::new(AtomicU32::new(0));
        let def = WorkflowDefinition::on_event("nap", "x").sleep("wait", Duration::from_secs(3600));
        let def = counting_step(def, "after", after.clone());
        let h = harness(vec![def]);
        let run_id = h.start("nap", Event::new("x", json!({}))).await;

        let wake_at = h.clock.now() + chrono::Duration::hours(1);
        assert_eq!(
            h.executor.advance(run_id).await.unwrap(),
            RunOutcome::Sleeping { wake_at }
        );
        let run = h.run(run_id).await;
        assert_eq!(run.status, WorkflowStatus::Sleeping);
        assert_eq!(run.wake_at, Some(wake_at));
        assert_eq!(run.current_step_index, 1);

        // Not yet due.
        h.clock.advance(Duration::from_secs(3599));
        assert_eq!(
            h.executor.advance(run_id).await.unwrap(),
            RunOutcome::Skipped(WorkflowStatus::Sleeping)
        );
        assert_eq!(after.load(Ordering::SeqCst), 0);

        h.clock.advance(Duration::from_secs(1));
        assert_eq!(h.executor.advance(run_id).await.unwrap(), RunOutcome::Completed);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_sleep_resuspends() {
        let def = WorkflowDefinition::on_event("nap", "x")
            .sleep("wait", Duration::from_secs(60))
            .step("after", |_ctx| async { Ok(()) });
        let h = harness(vec![def]);
        let run_id = h.start("nap", Event::new("x", json!({}))).await;

        // Sleep result recorded but the index never moved.
        let now = h.clock.now();
        let wake_at = now + chrono::Duration::seconds(60);
        h.store
            .insert_step_result(StepResult::sleep(run_id, "wait", wake_at, now))
            .await
            .unwrap();

        assert_eq!(
            h.executor.advance(run_id).await.unwrap(),
            RunOutcome::Sleeping { wake_at }
        );
    }

    #[tokio::test]
    async fn test_past_wake_time_does_not_suspend() {
        let def = WorkflowDefinition::on_event("late", "x")
            .sleep_until("wait", |ctx| ctx.now - chrono::Duration::minutes(5))
            .step("after", |_ctx| async { Ok(()) });
        let h = harness(vec![def]);
        let run_id = h.start("late", Event::new("x", json!({}))).await;

        assert_eq!(h.executor.advance(run_id).await.unwrap(), RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let def = WorkflowDefinition::on_event("flaky", "x")
            .retry(fast_retry(3))
            .step("send", move |ctx: StepContext| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if ctx.attempt < 3 {
                        Err(StepError::transient("relay unavailable"))
                    } else {
                        Ok("sent")
                    }
                }
            });
        let h = harness(vec![def]);
        let run_id = h.start("flaky", Event::new("x", json!({}))).await;

        assert_eq!(h.executor.advance(run_id).await.unwrap(), RunOutcome::Completed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let def = WorkflowDefinition::on_event("broken", "x")
            .retry(fast_retry(2))
            .step("send", move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StepError::transient("relay unavailable"))
                }
            });
        let h = harness(vec![def]);
        let run_id = h.start("broken", Event::new("x", json!({}))).await;

        let outcome = h.executor.advance(run_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let run = h.run(run_id).await;
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert!(run.error.unwrap().contains("relay unavailable"));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let later = Arc::new(AtomicU32::new(0));
        let def = WorkflowDefinition::on_event("bad", "x")
            .retry(fast_retry(5))
            .step("validate", move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StepError::permanent("story not found"))
                }
            });
        let def = counting_step(def, "after", later.clone());
        let h = harness(vec![def]);
        let run_id = h.start("bad", Event::new("x", json!({}))).await;

        assert!(matches!(
            h.executor.advance(run_id).await.unwrap(),
            RunOutcome::Failed { .. }
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(later.load(Ordering::SeqCst), 0);

        // Failed runs are terminal.
        assert_eq!(
            h.executor.advance(run_id).await.unwrap(),
            RunOutcome::Skipped(WorkflowStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let def = WorkflowDefinition::on_event("slow", "x")
            .retry(fast_retry(2))
            .step_timeout(Duration::from_millis(20))
            .step("hang", move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            });
        let h = harness(vec![def]);
        let run_id = h.start("slow", Event::new("x", json!({}))).await;

        match h.executor.advance(run_id).await.unwrap() {
            RunOutcome::Failed { error } => assert!(error.contains("timed out")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregistered_definition_fails_run() {
        let h = harness(vec![]);
        let run_id = h.start("ghost", Event::new("x", json!({}))).await;

        assert!(matches!(
            h.executor.advance(run_id).await.unwrap(),
            RunOutcome::Failed { .. }
        ));
        assert_eq!(h.run(run_id).await.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let h = harness(vec![]);
        assert!(matches!(
            h.executor.advance(Uuid::new_v4()).await,
            Err(VibleError::NotFound(_))
        ));
    }
}
