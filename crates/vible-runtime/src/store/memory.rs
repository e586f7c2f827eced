use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use vible_core::error::{Result, VibleError};
use vible_core::model::{ConnectionRequest, Message, Story, User};
use vible_core::store::{
    ConnectionStore, MessageStore, RunStore, StoreFuture, StoryStore, UserStore,
};
use vible_core::workflow::{StepResult, WorkflowRun, WorkflowStatus};

/// In-process store used in development and tests.
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<Uuid, WorkflowRun>>,
    steps: RwLock<HashMap<(Uuid, String), StepResult>>,
    messages: RwLock<Vec<Message>>,
    users: RwLock<HashMap<String, User>>,
    stories: RwLock<HashMap<String, Story>>,
    connections: RwLock<HashMap<String, ConnectionRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryStore {
    fn insert_run(&self, run: WorkflowRun) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut runs = self.runs.write().await;
            if runs.contains_key(&run.run_id) {
                return Err(VibleError::InvalidState(format!(
                    "run {} already exists",
                    run.run_id
                )));
            }
            runs.insert(run.run_id, run);
            Ok(())
        })
    }

    fn get_run(&self, run_id: Uuid) -> StoreFuture<'_, Option<WorkflowRun>> {
        Box::pin(async move { Ok(self.runs.read().await.get(&run_id).cloned()) })
    }

    fn update_run(&self, run: WorkflowRun) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut runs = self.runs.write().await;
            match runs.get_mut(&run.run_id) {
                Some(existing) => {
                    *existing = run;
                    Ok(())
                }
                None => Err(VibleError::NotFound(format!("run {}", run.run_id))),
            }
        })
    }

    fn runs_with_status(&self, statuses: Vec<WorkflowStatus>) -> StoreFuture<'_, Vec<WorkflowRun>> {
        Box::pin(async move {
            let runs = self.runs.read().await;
            let mut matching: Vec<_> = runs
                .values()
                .filter(|r| statuses.contains(&r.status))
                .cloned()
                .collect();
            matching.sort_by_key(|r| r.created_at);
            Ok(matching)
        })
    }

    fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<WorkflowRun>> {
        Box::pin(async move {
            let mut runs = self.runs.write().await;
            let mut due: Vec<_> = runs
                .values()
                .filter(|r| r.is_due(now))
                .map(|r| (r.wake_at, r.run_id))
                .collect();
            due.sort();
            due.truncate(limit);

            let mut claimed = Vec::with_capacity(due.len());
            for (_, run_id) in due {
                if let Some(run) = runs.get_mut(&run_id) {
                    run.start(now);
                    claimed.push(run.clone());
                }
            }
            Ok(claimed)
        })
    }

    fn claim_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<WorkflowRun>> {
        Box::pin(async move {
            let mut runs = self.runs.write().await;
            let mut stale: Vec<_> = runs
                .values()
                .filter(|r| {
                    matches!(r.status, WorkflowStatus::Pending | WorkflowStatus::Running)
                        && r.updated_at < stale_before
                })
                .map(|r| (r.updated_at, r.run_id))
                .collect();
            stale.sort();
            stale.truncate(limit);

            let mut claimed = Vec::with_capacity(stale.len());
            for (_, run_id) in stale {
                if let Some(run) = runs.get_mut(&run_id) {
                    run.updated_at = now;
                    claimed.push(run.clone());
                }
            }
            Ok(claimed)
        })
    }

    fn step_results(&self, run_id: Uuid) -> StoreFuture<'_, Vec<StepResult>> {
        Box::pin(async move {
            let steps = self.steps.read().await;
            let mut results: Vec<_> = steps
                .values()
                .filter(|s| s.run_id == run_id)
                .cloned()
                .collect();
            results.sort_by_key(|s| s.completed_at);
            Ok(results)
        })
    }

    fn insert_step_result(&self, result: StepResult) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut steps = self.steps.write().await;
            let key = (result.run_id, result.step_name.clone());
            if steps.contains_key(&key) {
                return Ok(false);
            }
            steps.insert(key, result);
            Ok(true)
        })
    }
}

impl MessageStore for MemoryStore {
    fn create_message(&self, message: Message) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.messages.write().await.push(message);
            Ok(())
        })
    }

    fn find_message(&self, id: Uuid) -> StoreFuture<'_, Option<Message>> {
        Box::pin(async move {
            let messages = self.messages.read().await;
            Ok(messages.iter().find(|m| m.id == id).cloned())
        })
    }

    fn thread(&self, user_id: String, peer_id: String) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let messages = self.messages.read().await;
            let mut thread: Vec<_> = messages
                .iter()
                .filter(|m| m.involves(&user_id, &peer_id))
                .cloned()
                .collect();
            thread.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(thread)
        })
    }

    fn mark_seen(&self, from_user_id: String, to_user_id: String) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut messages = self.messages.write().await;
            let mut changed = 0;
            for message in messages
                .iter_mut()
                .filter(|m| m.from_user_id == from_user_id && m.to_user_id == to_user_id)
            {
                if !message.seen {
                    message.seen = true;
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn unseen(&self) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let messages = self.messages.read().await;
            Ok(messages.iter().filter(|m| !m.seen).cloned().collect())
        })
    }

    fn recent_conversations(&self, user_id: String) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let messages = self.messages.read().await;
            let mut latest: HashMap<&str, &Message> = HashMap::new();
            for message in messages
                .iter()
                .filter(|m| m.from_user_id == user_id || m.to_user_id == user_id)
            {
                let peer = message.counterpart(&user_id);
                match latest.get(peer) {
                    Some(current) if current.created_at >= message.created_at => {}
                    _ => {
                        latest.insert(peer, message);
                    }
                }
            }
            let mut recent: Vec<Message> = latest.into_values().cloned().collect();
            recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(recent)
        })
    }
}

impl UserStore for MemoryStore {
    fn find_user(&self, id: String) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move { Ok(self.users.read().await.get(&id).cloned()) })
    }

    fn find_by_username(&self, username: String) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move {
            let users = self.users.read().await;
            Ok(users.values().find(|u| u.username == username).cloned())
        })
    }

    fn create_user(&self, user: User) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut users = self.users.write().await;
            if users.contains_key(&user.id) {
                return Err(VibleError::Validation(format!(
                    "user {} already exists",
                    user.id
                )));
            }
            users.insert(user.id.clone(), user);
            Ok(())
        })
    }

    fn update_user(&self, user: User) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut users = self.users.write().await;
            match users.get_mut(&user.id) {
                Some(existing) => {
                    *existing = user;
                    Ok(())
                }
                None => Err(VibleError::NotFound(format!("user {}", user.id))),
            }
        })
    }

    fn delete_user(&self, id: String) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.users.write().await.remove(&id).is_some()) })
    }
}

impl StoryStore for MemoryStore {
    fn create_story(&self, story: Story) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.stories.write().await.insert(story.id.clone(), story);
            Ok(())
        })
    }

    fn find_story(&self, id: String) -> StoreFuture<'_, Option<Story>> {
        Box::pin(async move { Ok(self.stories.read().await.get(&id).cloned()) })
    }

    fn delete_story(&self, id: String) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.stories.write().await.remove(&id).is_some()) })
    }
}

impl ConnectionStore for MemoryStore {
    fn create_connection(&self, request: ConnectionRequest) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.connections
                .write()
                .await
                .insert(request.id.clone(), request);
            Ok(())
        })
    }

    fn find_connection(&self, id: String) -> StoreFuture<'_, Option<ConnectionRequest>> {
        Box::pin(async move { Ok(self.connections.read().await.get(&id).cloned()) })
    }
}
