use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::step::StepError;
use crate::event::Event;

/// Everything a step body can see about its run.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Run being advanced.
    pub run_id: Uuid,
    /// Definition the run belongs to.
    pub definition_id: String,
    /// Event that started the run.
    pub event: Event,
    /// Attempt number for this step, starting at 1.
    pub attempt: u32,
    /// Clock reading when the step was entered.
    pub now: DateTime<Utc>,
    /// Outputs of earlier steps, by step name.
    pub outputs: HashMap<String, serde_json::Value>,
}

impl StepContext {
    /// Output of an earlier step.
    pub fn output(&self, step_name: &str) -> Option<&serde_json::Value> {
        self.outputs.get(step_name)
    }

    /// Typed output of an earlier step.
    pub fn output_as<T: DeserializeOwned>(&self, step_name: &str) -> Result<T, StepError> {
        let value = self.output(step_name).ok_or_else(|| {
            StepError::permanent(format!("step '{}' has no recorded output", step_name))
        })?;
        serde_json::from_value(value.clone()).map_err(StepError::permanent)
    }

    /// Typed trigger payload. A malformed payload can never succeed on retry.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        self.event.payload_as().map_err(StepError::from)
    }
}
