use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::WorkflowStatus;
use crate::event::Event;

/// One execution of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub definition_id: String,
    pub trigger_event: Event,
    pub status: WorkflowStatus,
    /// Index of the next step to execute. Never decreases.
    pub current_step_index: usize,
    pub wake_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// A pending run, not yet persisted.
    pub fn new(definition_id: impl Into<String>, trigger_event: Event, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            definition_id: definition_id.into(),
            trigger_event,
            status: WorkflowStatus::Pending,
            current_step_index: 0,
            wake_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = WorkflowStatus::Running;
        self.wake_at = None;
        self.updated_at = now;
    }

    /// Move past the current step.
    pub fn advance_to(&mut self, index: usize, now: DateTime<Utc>) {
        self.current_step_index = self.current_step_index.max(index);
        self.updated_at = now;
    }

    pub fn suspend_until(&mut self, wake_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = WorkflowStatus::Sleeping;
        self.wake_at = Some(wake_at);
        self.updated_at = now;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = WorkflowStatus::Completed;
        self.wake_at = None;
        self.updated_at = now;
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = WorkflowStatus::Failed;
        self.wake_at = None;
        self.error = Some(error.into());
        self.updated_at = now;
    }

    /// A sleeping run may continue once its wake time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.wake_at) {
            (WorkflowStatus::Sleeping, Some(wake_at)) => wake_at <= now,
            (WorkflowStatus::Sleeping, None) => true,
            _ => false,
        }
    }
}
