//! Daily email telling each user how many messages they have not read.

use std::collections::BTreeMap;

use serde_json::json;

use vible_core::cron::CronTrigger;
use vible_core::email::Email;
use vible_core::error::{Result, VibleError};
use vible_core::workflow::WorkflowDefinition;

use super::{email_body, link, WorkflowDeps};

/// Every day at 09:00 New York time.
pub const DIGEST_SCHEDULE: &str = "TZ=America/New_York 0 9 * * *";

pub fn unseen_digest(deps: WorkflowDeps) -> Result<WorkflowDefinition> {
    let trigger = CronTrigger::parse(DIGEST_SCHEDULE)
        .map_err(|e| VibleError::Config(e.to_string()))?;
    let counter = deps.clone();

    Ok(
        WorkflowDefinition::on_cron("send-unseen-messages-notification", trigger)
            .step("count-unseen", move |_ctx| {
                let deps = counter.clone();
                async move {
                    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
                    for message in deps.messages.unseen().await? {
                        *counts.entry(message.to_user_id).or_default() += 1;
                    }
                    Ok(counts)
                }
            })
            .step("send-notifications", move |ctx| {
                let deps = deps.clone();
                async move {
                    let counts: BTreeMap<String, u64> = ctx.output_as("count-unseen")?;

                    // Per-recipient failures are recorded, never raised.
                    let mut notified = 0usize;
                    let mut failed = Vec::new();
                    for (user_id, count) in counts {
                        match notify(&deps, &user_id, count).await {
                            Ok(true) => notified += 1,
                            Ok(false) => {
                                tracing::warn!(user_id = %user_id, "Unseen messages for unknown user");
                            }
                            Err(e) => {
                                tracing::warn!(user_id = %user_id, error = %e, "Digest email failed");
                                failed.push(user_id);
                            }
                        }
                    }

                    tracing::info!(notified, failed = failed.len(), "Unseen message digest sent");
                    Ok(json!({ "notified": notified, "failed": failed }))
                }
            }),
    )
}

/// Email one user their unseen count. `false` when the user is unknown.
async fn notify(deps: &WorkflowDeps, user_id: &str, count: u64) -> Result<bool> {
    let Some(user) = deps.users.find_user(user_id.to_string()).await? else {
        return Ok(false);
    };

    let body = email_body(
        &user.full_name,
        &[
            format!("You have {} unseen messages", count),
            format!(
                "Click {} to read them",
                link(&format!("{}/messages", deps.frontend_url), "here")
            ),
        ],
    );
    deps.email
        .send(Email {
            to: user.email,
            subject: format!("📬 You have {} unseen messages", count),
            body,
        })
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use vible_core::model::{MediaType, Message, User};
    use vible_core::store::{MessageStore, RunStore, UserStore};
    use vible_core::workflow::WorkflowStatus;

    use crate::workflows::testing::Harness;

    async fn seed_user(harness: &Harness, id: &str) {
        harness
            .store
            .create_user(User {
                id: id.into(),
                email: format!("{}@example.com", id),
                full_name: id.to_uppercase(),
                username: id.into(),
                profile_picture: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    async fn seed_message(harness: &Harness, from: &str, to: &str, seen: bool) {
        harness
            .store
            .create_message(Message {
                id: Uuid::new_v4(),
                from_user_id: from.into(),
                to_user_id: to.into(),
                text: "hi".into(),
                media_type: MediaType::Text,
                media_url: None,
                seen,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_digest_emails_every_user_with_unseen() {
        // 07:00 in New York.
        let mut harness = Harness::new();
        seed_user(&harness, "alice").await;
        seed_user(&harness, "bob").await;
        seed_message(&harness, "carol", "alice", false).await;
        seed_message(&harness, "carol", "alice", false).await;
        seed_message(&harness, "carol", "bob", false).await;
        seed_message(&harness, "carol", "bob", true).await;
        seed_message(&harness, "alice", "ghost", false).await;

        harness.advance_clock(Duration::from_secs(60 * 60)).await;
        assert!(harness.email.sent().await.is_empty());

        harness.advance_clock(Duration::from_secs(60 * 60)).await;
        let mut sent = harness.email.sent().await;
        sent.sort_by(|a, b| a.to.cmp(&b.to));
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "alice@example.com");
        assert_eq!(sent[0].subject, "📬 You have 2 unseen messages");
        assert_eq!(sent[1].to, "bob@example.com");
        assert!(sent[1].body.contains("You have 1 unseen messages"));
        assert!(sent[1].body.contains("https://vible.test/messages"));
    }

    #[tokio::test]
    async fn test_digest_fires_once_per_day() {
        let mut harness = Harness::new();
        seed_user(&harness, "alice").await;
        seed_message(&harness, "bob", "alice", false).await;

        for _ in 0..(48 * 4) {
            harness.advance_clock(Duration::from_secs(15 * 60)).await;
        }
        assert_eq!(harness.email.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_resend_others() {
        let mut harness = Harness::new();
        seed_user(&harness, "alice").await;
        seed_user(&harness, "bob").await;
        seed_message(&harness, "carol", "alice", false).await;
        seed_message(&harness, "carol", "bob", false).await;
        harness.email.reject("bob@example.com").await;

        harness.advance_clock(Duration::from_secs(2 * 60 * 60)).await;

        let sent = harness.email.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");

        let runs = harness
            .store
            .runs_with_status(vec![WorkflowStatus::Completed])
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        let steps = harness.store.step_results(runs[0].run_id).await.unwrap();
        let output = &steps
            .iter()
            .find(|s| s.step_name == "send-notifications")
            .unwrap()
            .output;
        assert_eq!(output["notified"], 1);
        assert_eq!(output["failed"], serde_json::json!(["bob"]));
    }
}
