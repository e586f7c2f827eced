use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use vible_core::error::Result;
use vible_core::store::RunStore;
use vible_core::workflow::{WorkflowDefinition, WorkflowRun};
use vible_core::{Clock, Event};

use super::registry::WorkflowRegistry;

/// Receiving end of the run queue, consumed by the worker pool.
pub type RunQueue = mpsc::UnboundedReceiver<Uuid>;

/// Matches events to definitions and starts runs.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<WorkflowRegistry>,
    runs: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
    queue: mpsc::UnboundedSender<Uuid>,
}

impl EventBus {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        runs: Arc<dyn RunStore>,
        clock: Arc<dyn Clock>,
    ) -> (Self, RunQueue) {
        let (queue, rx) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                runs,
                clock,
                queue,
            },
            rx,
        )
    }

    /// Start one run per definition listening for `event.name`.
    ///
    /// Publishing the same event twice starts two independent sets of runs.
    pub async fn publish(&self, event: Event) -> Result<Vec<Uuid>> {
        let definitions = self.registry.for_event(&event.name);
        if definitions.is_empty() {
            tracing::debug!(event = %event.name, "No workflow listens for event");
            return Ok(Vec::new());
        }

        let mut run_ids = Vec::with_capacity(definitions.len());
        for definition in definitions {
            run_ids.push(self.start_run(&definition, event.clone()).await?);
        }

        tracing::info!(event = %event.name, runs = run_ids.len(), "Event published");
        Ok(run_ids)
    }

    /// Persist a pending run of `definition` and queue it.
    pub async fn start_run(&self, definition: &WorkflowDefinition, event: Event) -> Result<Uuid> {
        let run = WorkflowRun::new(definition.id(), event, self.clock.now());
        let run_id = run.run_id;
        self.runs.insert_run(run).await?;

        tracing::debug!(run_id = %run_id, workflow = definition.id(), "Run created");
        self.enqueue(run_id);
        Ok(run_id)
    }

    /// Hand a persisted run to the worker pool.
    ///
    /// A closed queue only happens during shutdown; the run stays persisted
    /// and is picked up by recovery on the next start.
    pub fn enqueue(&self, run_id: Uuid) {
        if self.queue.send(run_id).is_err() {
            tracing::warn!(run_id = %run_id, "Run queue closed, run left for recovery");
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }
}
