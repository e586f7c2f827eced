//! Vible backend: durable workflows for user lifecycle events plus live
//! message delivery.

mod runtime;
pub mod workflows;

pub use runtime::{Vible, VibleBuilder};
