use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::bus::{EventBus, RunQueue};
use super::executor::{RunOutcome, WorkflowExecutor};

/// In-flight runs, flagged `true` when the run was queued again meanwhile.
type InFlight = DashMap<Uuid, bool>;

/// Bounded pool that advances queued runs.
pub struct WorkflowWorker {
    executor: Arc<WorkflowExecutor>,
    bus: EventBus,
    max_concurrent: usize,
    in_flight: Arc<InFlight>,
}

impl WorkflowWorker {
    pub fn new(executor: Arc<WorkflowExecutor>, bus: EventBus, max_concurrent: usize) -> Self {
        Self {
            executor,
            bus,
            max_concurrent: max_concurrent.max(1),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Consume the queue until shutdown, then wait for in-flight runs.
    pub async fn run(&self, mut queue: RunQueue, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        tracing::info!(max_concurrent = self.max_concurrent, "Workflow worker started");

        loop {
            let run_id = tokio::select! {
                next = queue.recv() => match next {
                    Some(run_id) => run_id,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };

            match self.in_flight.entry(run_id) {
                Entry::Occupied(mut entry) => {
                    *entry.get_mut() = true;
                    tracing::debug!(run_id = %run_id, "Run already in flight, rerun requested");
                    continue;
                }
                Entry::Vacant(entry) => {
                    entry.insert(false);
                }
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => {
                    self.in_flight.remove(&run_id);
                    break;
                }
            };

            let executor = self.executor.clone();
            let in_flight = self.in_flight.clone();
            let bus = self.bus.clone();
            tokio::spawn(async move {
                match executor.advance(run_id).await {
                    Ok(RunOutcome::Completed) => {}
                    Ok(RunOutcome::Sleeping { wake_at }) => {
                        tracing::debug!(run_id = %run_id, wake_at = %wake_at, "Run suspended");
                    }
                    Ok(RunOutcome::Failed { error }) => {
                        tracing::warn!(run_id = %run_id, error = %error, "Run failed");
                    }
                    Ok(RunOutcome::Skipped(status)) => {
                        tracing::debug!(run_id = %run_id, status = %status, "Run skipped");
                    }
                    Err(e) => {
                        tracing::error!(run_id = %run_id, error = %e, "Failed to advance run");
                    }
                }
                finish(&in_flight, &bus, run_id);
                drop(permit);
            });
        }

        // Drain: every permit back means every spawned run has finished.
        let _ = semaphore.acquire_many(self.max_concurrent as u32).await;
        tracing::info!("Workflow worker stopped");
    }
}

/// Clear the in-flight marker, re-queueing the run if it arrived again
/// while it was being advanced.
fn finish(in_flight: &InFlight, bus: &EventBus, run_id: Uuid) {
    if let Some((_, true)) = in_flight.remove(&run_id) {
        tracing::debug!(run_id = %run_id, "Re-queueing run requested while in flight");
        bus.enqueue(run_id);
    }
}
