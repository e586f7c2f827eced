//! Delete a story a day after it was posted.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use vible_core::workflow::WorkflowDefinition;

use super::WorkflowDeps;

const STORY_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryPosted {
    story_id: String,
}

/// `app/story.delete {storyId}`
pub fn story_expiry(deps: WorkflowDeps) -> WorkflowDefinition {
    WorkflowDefinition::on_event("story-delete", "app/story.delete")
        .sleep("wait-for-24-hours", STORY_LIFETIME)
        .step("delete-story", move |ctx| {
            let deps = deps.clone();
            async move {
                let StoryPosted { story_id } = ctx.payload()?;
                let deleted = deps.stories.delete_story(story_id.clone()).await?;
                if !deleted {
                    tracing::debug!(story_id = %story_id, "Story already gone");
                }
                Ok(json!({ "message": "Story deleted.", "deleted": deleted }))
            }
        })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use vible_core::model::Story;
    use vible_core::store::StoryStore;
    use vible_core::workflow::WorkflowStatus;

    use super::STORY_LIFETIME;
    use crate::workflows::testing::{start, Harness};

    #[tokio::test]
    async fn test_story_deleted_after_a_day() {
        let mut harness = Harness::new();
        harness
            .store
            .create_story(Story {
                id: "s1".into(),
                user_id: "alice".into(),
                content: "sunset".into(),
                media_url: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let runs = harness
            .publish("app/story.delete", json!({ "storyId": "s1" }))
            .await;
        assert_eq!(runs.len(), 1);

        let run = harness.run(runs[0]).await;
        assert_eq!(run.status, WorkflowStatus::Sleeping);
        assert_eq!(
            run.wake_at,
            Some(start() + chrono::Duration::hours(24))
        );

        harness.advance_clock(Duration::from_secs(12 * 60 * 60)).await;
        assert!(harness.store.find_story("s1".into()).await.unwrap().is_some());

        harness.advance_clock(STORY_LIFETIME).await;
        assert_eq!(harness.status(runs[0]).await, WorkflowStatus::Completed);
        assert!(harness.store.find_story("s1".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_story_still_completes() {
        let mut harness = Harness::new();
        let runs = harness
            .publish("app/story.delete", json!({ "storyId": "gone" }))
            .await;

        harness.advance_clock(STORY_LIFETIME).await;
        assert_eq!(harness.status(runs[0]).await, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_malformed_payload_fails_after_sleep() {
        let mut harness = Harness::new();
        let runs = harness.publish("app/story.delete", json!({ "id": "s1" })).await;

        harness.advance_clock(STORY_LIFETIME).await;
        assert_eq!(harness.status(runs[0]).await, WorkflowStatus::Failed);
    }
}
