//! Core types for vible: workflow definitions and runs, cron triggers,
//! message and collaborator models, store traits and the error taxonomy.

pub mod clock;
pub mod config;
pub mod cron;
pub mod email;
pub mod error;
pub mod event;
pub mod model;
pub mod realtime;
pub mod store;
pub mod workflow;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VibleConfig;
pub use error::{Result, VibleError};
pub use event::Event;
