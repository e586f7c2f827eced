mod dispatcher;
mod registry;

pub use dispatcher::MessageDispatcher;
pub use registry::{ConnectionRegistry, Subscription};
