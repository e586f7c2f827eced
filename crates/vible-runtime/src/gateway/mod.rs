mod auth;
mod events;
mod messages;
mod response;
mod server;
mod tracing;

pub use auth::{CallerId, USER_ID_HEADER};
pub use response::{ApiError, ApiResponse};
pub use server::{GatewayServer, GatewayState};
pub use self::tracing::{TraceId, TRACE_ID_HEADER};
