//! Store implementations and the bundle handed to the runtime.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::sync::Arc;

use vible_core::store::{ConnectionStore, MessageStore, RunStore, StoryStore, UserStore};

/// Every store the runtime needs, behind trait objects.
#[derive(Clone)]
pub struct Stores {
    pub runs: Arc<dyn RunStore>,
    pub messages: Arc<dyn MessageStore>,
    pub users: Arc<dyn UserStore>,
    pub stories: Arc<dyn StoryStore>,
    pub connections: Arc<dyn ConnectionStore>,
}

impl Stores {
    /// All stores backed by one value implementing every trait.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: RunStore + MessageStore + UserStore + StoryStore + ConnectionStore,
    {
        Self {
            runs: store.clone(),
            messages: store.clone(),
            users: store.clone(),
            stories: store.clone(),
            connections: store,
        }
    }

    /// Process-local stores. Nothing survives a restart.
    pub fn memory() -> Self {
        Self::from_shared(Arc::new(MemoryStore::new()))
    }
}
