//! Runtime for Vible: stores, the workflow engine, live message delivery
//! and the HTTP gateway.

pub mod db;
pub mod email;
pub mod gateway;
pub mod migrations;
pub mod realtime;
pub mod store;
pub mod workflow;

pub use db::Database;
pub use gateway::{GatewayServer, GatewayState};
pub use migrations::MigrationRunner;
pub use realtime::{ConnectionRegistry, MessageDispatcher};
pub use store::{MemoryStore, PgStore, Stores};
pub use workflow::{EventBus, WorkflowExecutor, WorkflowRegistry, WorkflowScheduler, WorkflowWorker};
