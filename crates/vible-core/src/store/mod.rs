//! Persistence seams.
//!
//! Every method takes owned arguments and returns a boxed future so the
//! traits stay object safe and implementations can be swapped at runtime.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ConnectionRequest, Message, Story, User};
use crate::workflow::{StepResult, WorkflowRun, WorkflowStatus};

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable workflow state.
pub trait RunStore: Send + Sync + 'static {
    fn insert_run(&self, run: WorkflowRun) -> StoreFuture<'_, ()>;

    fn get_run(&self, run_id: Uuid) -> StoreFuture<'_, Option<WorkflowRun>>;

    /// Overwrite the mutable fields of an existing run.
    fn update_run(&self, run: WorkflowRun) -> StoreFuture<'_, ()>;

    fn runs_with_status(&self, statuses: Vec<WorkflowStatus>) -> StoreFuture<'_, Vec<WorkflowRun>>;

    /// Move sleeping runs with `wake_at <= now` to Running, earliest first,
    /// and return them. A run is claimed by at most one caller.
    fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<WorkflowRun>>;

    /// Pending or Running runs untouched since before `stale_before`, oldest
    /// first. Each claimed run has `updated_at` bumped to `now`, so it is not
    /// handed out again until another full lease passes.
    fn claim_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<WorkflowRun>>;

    fn step_results(&self, run_id: Uuid) -> StoreFuture<'_, Vec<StepResult>>;

    /// Append a step result. Returns `false` when one already exists for
    /// `(run_id, step_name)`; the stored result is left untouched.
    fn insert_step_result(&self, result: StepResult) -> StoreFuture<'_, bool>;
}

/// Durable direct messages.
pub trait MessageStore: Send + Sync + 'static {
    fn create_message(&self, message: Message) -> StoreFuture<'_, ()>;

    fn find_message(&self, id: Uuid) -> StoreFuture<'_, Option<Message>>;

    /// Conversation between two users, newest first.
    fn thread(&self, user_id: String, peer_id: String) -> StoreFuture<'_, Vec<Message>>;

    /// Mark everything `from` sent to `to` as seen. Returns rows changed.
    fn mark_seen(&self, from_user_id: String, to_user_id: String) -> StoreFuture<'_, u64>;

    /// All unseen messages.
    fn unseen(&self) -> StoreFuture<'_, Vec<Message>>;

    /// Latest message per counterpart of `user_id`, newest first.
    fn recent_conversations(&self, user_id: String) -> StoreFuture<'_, Vec<Message>>;
}

pub trait UserStore: Send + Sync + 'static {
    fn find_user(&self, id: String) -> StoreFuture<'_, Option<User>>;

    fn find_by_username(&self, username: String) -> StoreFuture<'_, Option<User>>;

    fn create_user(&self, user: User) -> StoreFuture<'_, ()>;

    /// Fails with `NotFound` when the user does not exist.
    fn update_user(&self, user: User) -> StoreFuture<'_, ()>;

    fn delete_user(&self, id: String) -> StoreFuture<'_, bool>;
}

pub trait StoryStore: Send + Sync + 'static {
    fn create_story(&self, story: Story) -> StoreFuture<'_, ()>;

    fn find_story(&self, id: String) -> StoreFuture<'_, Option<Story>>;

    fn delete_story(&self, id: String) -> StoreFuture<'_, bool>;
}

pub trait ConnectionStore: Send + Sync + 'static {
    /// Insert a request, or update the status of an existing one.
    fn create_connection(&self, request: ConnectionRequest) -> StoreFuture<'_, ()>;

    fn find_connection(&self, id: String) -> StoreFuture<'_, Option<ConnectionRequest>>;
}
