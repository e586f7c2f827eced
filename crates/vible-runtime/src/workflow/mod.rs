mod bus;
mod executor;
mod registry;
mod scheduler;
mod worker;

pub use bus::{EventBus, RunQueue};
pub use executor::{RunOutcome, WorkflowExecutor};
pub use registry::WorkflowRegistry;
pub use scheduler::{TickReport, WorkflowScheduler};
pub use worker::WorkflowWorker;
