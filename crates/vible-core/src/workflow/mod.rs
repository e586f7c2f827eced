mod context;
mod definition;
mod retry;
mod run;
mod status;
mod step;

pub use context::StepContext;
pub use definition::{Trigger, WorkflowDefinition};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use run::WorkflowRun;
pub use status::WorkflowStatus;
pub use step::{
    recorded_wake_at, StepDef, StepError, StepFuture, StepHandler, StepKind, StepResult, WakeFn,
};
