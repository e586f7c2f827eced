use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vible_core::config::SchedulerConfig;
use vible_core::error::Result;
use vible_core::store::RunStore;
use vible_core::workflow::{Trigger, WorkflowStatus};
use vible_core::{Clock, Event};

use super::bus::EventBus;

/// What one scheduler tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Sleeping runs handed back to the workers.
    pub resumed: Vec<Uuid>,
    /// Pending or Running runs whose lease ran out.
    pub reclaimed: Vec<Uuid>,
    /// Runs started by cron triggers.
    pub fired: Vec<Uuid>,
}

/// Wakes sleeping runs, reclaims stalled ones, and fires cron-triggered
/// definitions.
///
/// Cron bookkeeping lives in memory and is anchored at construction time:
/// occurrences missed while the process was down are not replayed, and
/// several occurrences between two ticks produce a single run.
pub struct WorkflowScheduler {
    bus: EventBus,
    runs: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    next_due: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl WorkflowScheduler {
    pub fn new(
        bus: EventBus,
        runs: Arc<dyn RunStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let now = clock.now();
        let next_due = bus
            .registry()
            .cron_definitions()
            .iter()
            .filter_map(|def| match def.trigger() {
                Trigger::Cron(trigger) => trigger
                    .next_after(now)
                    .map(|at| (def.id().to_string(), at)),
                Trigger::Event(_) => None,
            })
            .collect();

        Self {
            bus,
            runs,
            clock,
            config,
            next_due: Mutex::new(next_due),
        }
    }

    /// Re-queue runs a previous process left Pending or Running.
    pub async fn recover(&self) -> Result<usize> {
        let stranded = self
            .runs
            .runs_with_status(vec![WorkflowStatus::Pending, WorkflowStatus::Running])
            .await?;

        for run in &stranded {
            self.bus.enqueue(run.run_id);
        }
        if !stranded.is_empty() {
            tracing::info!(count = stranded.len(), "Recovered unfinished runs");
        }
        Ok(stranded.len())
    }

    /// Resume due sleeping runs, re-queue stalled runs, and fire due cron
    /// definitions.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        for run in self.runs.claim_due(now, self.config.batch_size).await? {
            tracing::debug!(run_id = %run.run_id, "Resuming sleeping run");
            self.bus.enqueue(run.run_id);
            report.resumed.push(run.run_id);
        }

        let lease = chrono::Duration::from_std(self.config.stale_after())
            .unwrap_or(chrono::Duration::MAX);
        let stale_before = now
            .checked_sub_signed(lease)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        for run in self
            .runs
            .claim_stale(stale_before, now, self.config.batch_size)
            .await?
        {
            tracing::warn!(
                run_id = %run.run_id,
                status = %run.status,
                last_update = %run.updated_at,
                "Re-queueing stalled run"
            );
            self.bus.enqueue(run.run_id);
            report.reclaimed.push(run.run_id);
        }

        let mut next_due = self.next_due.lock().await;
        for definition in self.bus.registry().cron_definitions() {
            let Trigger::Cron(trigger) = definition.trigger() else {
                continue;
            };
            let Some(due_at) = next_due.get(definition.id()).copied() else {
                continue;
            };
            if due_at > now {
                continue;
            }

            let event = Event::at(
                format!("cron/{}", definition.id()),
                serde_json::json!({ "scheduled_at": due_at }),
                now,
            );
            let run_id = self.bus.start_run(&definition, event).await?;
            tracing::info!(
                workflow = %definition.id(),
                run_id = %run_id,
                scheduled_at = %due_at,
                "Cron run fired"
            );
            report.fired.push(run_id);

            match trigger.next_after(now) {
                Some(next) => {
                    next_due.insert(definition.id().to_string(), next);
                }
                None => {
                    next_due.remove(definition.id());
                }
            }
        }

        Ok(report)
    }

    /// Tick every `poll_interval` until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval = ?self.config.poll_interval(),
            batch_size = self.config.batch_size,
            "Workflow scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(self.clock.now()).await {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Workflow scheduler shutting down");
                    break;
                }
            }
        }
    }
}
