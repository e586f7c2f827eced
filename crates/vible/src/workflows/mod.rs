//! Workflow definitions shipped with Vible.

mod connection_reminder;
mod story_expiry;
mod unseen_digest;
mod user_sync;

pub use connection_reminder::connection_reminder;
pub use story_expiry::story_expiry;
pub use unseen_digest::{unseen_digest, DIGEST_SCHEDULE};
pub use user_sync::{user_created, user_deleted, user_updated};

use std::sync::Arc;

use vible_core::email::EmailSender;
use vible_core::error::Result;
use vible_core::store::{ConnectionStore, MessageStore, StoryStore, UserStore};
use vible_runtime::store::Stores;
use vible_runtime::WorkflowRegistry;

/// Collaborators the step bodies call.
#[derive(Clone)]
pub struct WorkflowDeps {
    pub users: Arc<dyn UserStore>,
    pub stories: Arc<dyn StoryStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub email: Arc<dyn EmailSender>,
    /// Base URL used for links in emails.
    pub frontend_url: String,
}

impl WorkflowDeps {
    pub fn new(stores: &Stores, email: Arc<dyn EmailSender>, frontend_url: impl Into<String>) -> Self {
        Self {
            users: stores.users.clone(),
            stories: stores.stories.clone(),
            connections: stores.connections.clone(),
            messages: stores.messages.clone(),
            email,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Register every built-in workflow.
pub fn register_all(registry: &mut WorkflowRegistry, deps: &WorkflowDeps) -> Result<()> {
    registry.register(user_created(deps.clone()))?;
    registry.register(user_updated(deps.clone()))?;
    registry.register(user_deleted(deps.clone()))?;
    registry.register(connection_reminder(deps.clone()))?;
    registry.register(story_expiry(deps.clone()))?;
    registry.register(unseen_digest(deps.clone())?)?;
    Ok(())
}

/// Wrap email paragraphs in the shared layout and signature.
fn email_body(name: &str, paragraphs: &[String]) -> String {
    let mut body = String::from(r#"<div style="font-family: Arial, sans-serif; padding: 20px;">"#);
    body.push_str(&format!("<h2>Hi {},</h2>", escape_html(name)));
    for paragraph in paragraphs {
        body.push_str(&format!("<p>{}</p>", paragraph));
    }
    body.push_str("<br /><p>Thanks,<br />Vible - Stay Connected</p></div>");
    body
}

fn link(href: &str, text: &str) -> String {
    format!(r#"<a href="{}" style="color: #10b981;">{}</a>"#, href, text)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    //! Drives workflow runs end to end against in-memory collaborators.

    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use uuid::Uuid;

    use vible_core::config::{ExecutorConfig, SchedulerConfig};
    use vible_core::workflow::{WorkflowRun, WorkflowStatus};
    use vible_core::{Clock, Event, ManualClock};
    use vible_runtime::email::MemoryEmailSender;
    use vible_runtime::store::{MemoryStore, Stores};
    use vible_runtime::workflow::{RunQueue, WorkflowScheduler};
    use vible_runtime::{EventBus, WorkflowExecutor, WorkflowRegistry};

    use super::{register_all, WorkflowDeps};

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub email: Arc<MemoryEmailSender>,
        pub clock: Arc<ManualClock>,
        pub bus: EventBus,
        pub executor: WorkflowExecutor,
        pub scheduler: WorkflowScheduler,
        queue: RunQueue,
    }

    pub fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    impl Harness {
        pub fn new() -> Self {
            Self::at(start())
        }

        pub fn at(now: DateTime<Utc>) -> Self {
            let store = Arc::new(MemoryStore::new());
            let stores = Stores::from_shared(store.clone());
            let email = Arc::new(MemoryEmailSender::new());
            let clock = Arc::new(ManualClock::new(now));

            let deps = WorkflowDeps::new(&stores, email.clone(), "https://vible.test/");
            let mut registry = WorkflowRegistry::new();
            register_all(&mut registry, &deps).unwrap();
            let registry = Arc::new(registry);

            let config = ExecutorConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
                ..ExecutorConfig::default()
            };
            let executor =
                WorkflowExecutor::new(registry.clone(), stores.runs.clone(), clock.clone(), &config);
            let (bus, queue) = EventBus::new(registry, stores.runs.clone(), clock.clone());
            let scheduler = WorkflowScheduler::new(
                bus.clone(),
                stores.runs.clone(),
                clock.clone(),
                SchedulerConfig::default(),
            );

            Self {
                store,
                email,
                clock,
                bus,
                executor,
                scheduler,
                queue,
            }
        }

        /// Publish and advance every run it starts.
        pub async fn publish(&mut self, name: &str, payload: serde_json::Value) -> Vec<Uuid> {
            let event = Event::at(name, payload, self.clock.now());
            let run_ids = self.bus.publish(event).await.unwrap();
            self.drain().await;
            run_ids
        }

        /// Move the clock, tick the scheduler and advance whatever it queued.
        pub async fn advance_clock(&mut self, duration: std::time::Duration) {
            self.clock.advance(duration);
            self.scheduler.tick(self.clock.now()).await.unwrap();
            self.drain().await;
        }

        pub async fn drain(&mut self) {
            while let Ok(run_id) = self.queue.try_recv() {
                self.executor.advance(run_id).await.unwrap();
            }
        }

        pub async fn run(&self, run_id: Uuid) -> WorkflowRun {
            use vible_core::store::RunStore;
            self.store.get_run(run_id).await.unwrap().unwrap()
        }

        pub async fn status(&self, run_id: Uuid) -> WorkflowStatus {
            self.run(run_id).await.status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_body_escapes_name() {
        let body = email_body("<Eve>", &["hello".to_string()]);
        assert!(body.contains("Hi &lt;Eve&gt;,"));
        assert!(body.contains("<p>hello</p>"));
        assert!(body.contains("Vible - Stay Connected"));
    }

    #[test]
    fn test_register_all() {
        let stores = Stores::memory();
        let deps = WorkflowDeps::new(
            &stores,
            Arc::new(vible_runtime::email::LogEmailSender),
            "https://vible.test/",
        );
        assert_eq!(deps.frontend_url, "https://vible.test");

        let mut registry = WorkflowRegistry::new();
        register_all(&mut registry, &deps).unwrap();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.for_event("app/story.delete").len(), 1);
        assert_eq!(registry.cron_definitions().len(), 1);

        assert!(register_all(&mut registry, &deps).is_err());
    }
}
