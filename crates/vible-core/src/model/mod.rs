//! Records owned by the document store.

mod connection;
mod message;
mod story;
mod user;

pub use connection::{ConnectionRequest, ConnectionStatus};
pub use message::{MediaType, Message, MessagePush, NewMessage};
pub use story::Story;
pub use user::User;
