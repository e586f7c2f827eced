use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use vible_core::error::{Result, VibleError};
use vible_core::model::{ConnectionRequest, Message, Story, User};
use vible_core::store::{
    ConnectionStore, MessageStore, RunStore, StoreFuture, StoryStore, UserStore,
};
use vible_core::workflow::{StepResult, WorkflowRun, WorkflowStatus};
use vible_core::Event;

const RUN_COLUMNS: &str = "run_id, definition_id, trigger_event, status, current_step_index, \
                           wake_at, error, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, from_user_id, to_user_id, text, media_type, media_url, seen, created_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn run_from_row(row: &PgRow) -> Result<WorkflowRun> {
    let status: String = row.try_get("status")?;
    let index: i32 = row.try_get("current_step_index")?;
    let Json(trigger_event): Json<Event> = row.try_get("trigger_event")?;

    Ok(WorkflowRun {
        run_id: row.try_get("run_id")?,
        definition_id: row.try_get("definition_id")?,
        trigger_event,
        status: status.parse()?,
        current_step_index: usize::try_from(index).map_err(|_| {
            VibleError::InvalidState(format!("negative step index {}", index))
        })?,
        wake_at: row.try_get("wake_at")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn step_from_row(row: &PgRow) -> Result<StepResult> {
    Ok(StepResult {
        run_id: row.try_get("run_id")?,
        step_name: row.try_get("step_name")?,
        output: row.try_get("output")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message> {
    let media_type: String = row.try_get("media_type")?;
    Ok(Message {
        id: row.try_get("id")?,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        text: row.try_get("text")?,
        media_type: media_type.parse()?,
        media_url: row.try_get("media_url")?,
        seen: row.try_get("seen")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        username: row.try_get("username")?,
        profile_picture: row.try_get("profile_picture")?,
        created_at: row.try_get("created_at")?,
    })
}

fn story_from_row(row: &PgRow) -> Result<Story> {
    Ok(Story {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        content: row.try_get("content")?,
        media_url: row.try_get("media_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn connection_from_row(row: &PgRow) -> Result<ConnectionRequest> {
    let status: String = row.try_get("status")?;
    Ok(ConnectionRequest {
        id: row.try_get("id")?,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

fn step_index(run: &WorkflowRun) -> Result<i32> {
    i32::try_from(run.current_step_index)
        .map_err(|_| VibleError::InvalidState("step index overflow".into()))
}

impl RunStore for PgStore {
    fn insert_run(&self, run: WorkflowRun) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO vible_workflow_runs (
                    run_id, definition_id, trigger_event, status, current_step_index,
                    wake_at, error, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(run.run_id)
            .bind(&run.definition_id)
            .bind(Json(&run.trigger_event))
            .bind(run.status.as_str())
            .bind(step_index(&run)?)
            .bind(run.wake_at)
            .bind(&run.error)
            .bind(run.created_at)
            .bind(run.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn get_run(&self, run_id: Uuid) -> StoreFuture<'_, Option<WorkflowRun>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {} FROM vible_workflow_runs WHERE run_id = $1",
                RUN_COLUMNS
            ))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(run_from_row).transpose()
        })
    }

    fn update_run(&self, run: WorkflowRun) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE vible_workflow_runs
                SET status = $2, current_step_index = $3, wake_at = $4, error = $5,
                    updated_at = $6
                WHERE run_id = $1
                "#,
            )
            .bind(run.run_id)
            .bind(run.status.as_str())
            .bind(step_index(&run)?)
            .bind(run.wake_at)
            .bind(&run.error)
            .bind(run.updated_at)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(VibleError::NotFound(format!("run {}", run.run_id)));
            }
            Ok(())
        })
    }

    fn runs_with_status(&self, statuses: Vec<WorkflowStatus>) -> StoreFuture<'_, Vec<WorkflowRun>> {
        Box::pin(async move {
            let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
            let rows = sqlx::query(&format!(
                "SELECT {} FROM vible_workflow_runs WHERE status = ANY($1) ORDER BY created_at",
                RUN_COLUMNS
            ))
            .bind(&statuses)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(run_from_row).collect::<Result<Vec<_>>>()
        })
    }

    fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<WorkflowRun>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = sqlx::query(&format!(
                r#"
                UPDATE vible_workflow_runs
                SET status = 'running', wake_at = NULL, updated_at = $1
                WHERE run_id IN (
                    SELECT run_id FROM vible_workflow_runs
                    WHERE status = 'sleeping' AND (wake_at IS NULL OR wake_at <= $1)
                    ORDER BY wake_at
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING {}
                "#,
                RUN_COLUMNS
            ))
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(run_from_row).collect::<Result<Vec<_>>>()
        })
    }

    fn claim_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<WorkflowRun>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = sqlx::query(&format!(
                r#"
                UPDATE vible_workflow_runs
                SET updated_at = $2
                WHERE run_id IN (
                    SELECT run_id FROM vible_workflow_runs
                    WHERE status IN ('pending', 'running') AND updated_at < $1
                    ORDER BY updated_at
                    LIMIT $3
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING {}
                "#,
                RUN_COLUMNS
            ))
            .bind(stale_before)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(run_from_row).collect::<Result<Vec<_>>>()
        })
    }

    fn step_results(&self, run_id: Uuid) -> StoreFuture<'_, Vec<StepResult>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r#"
                SELECT run_id, step_name, output, completed_at
                FROM vible_workflow_steps
                WHERE run_id = $1
                ORDER BY completed_at
                "#,
            )
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(step_from_row).collect::<Result<Vec<_>>>()
        })
    }

    fn insert_step_result(&self, result: StepResult) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let inserted = sqlx::query(
                r#"
                INSERT INTO vible_workflow_steps (run_id, step_name, output, completed_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (run_id, step_name) DO NOTHING
                "#,
            )
            .bind(result.run_id)
            .bind(&result.step_name)
            .bind(&result.output)
            .bind(result.completed_at)
            .execute(&self.pool)
            .await?;
            Ok(inserted.rows_affected() == 1)
        })
    }
}

impl MessageStore for PgStore {
    fn create_message(&self, message: Message) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO vible_messages (
                    id, from_user_id, to_user_id, text, media_type, media_url, seen, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(message.id)
            .bind(&message.from_user_id)
            .bind(&message.to_user_id)
            .bind(&message.text)
            .bind(message.media_type.as_str())
            .bind(&message.media_url)
            .bind(message.seen)
            .bind(message.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn find_message(&self, id: Uuid) -> StoreFuture<'_, Option<Message>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {} FROM vible_messages WHERE id = $1",
                MESSAGE_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(message_from_row).transpose()
        })
    }

    fn thread(&self, user_id: String, peer_id: String) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                r#"
                SELECT {} FROM vible_messages
                WHERE (from_user_id = $1 AND to_user_id = $2)
                   OR (from_user_id = $2 AND to_user_id = $1)
                ORDER BY created_at DESC
                "#,
                MESSAGE_COLUMNS
            ))
            .bind(&user_id)
            .bind(&peer_id)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(message_from_row).collect::<Result<Vec<_>>>()
        })
    }

    fn mark_seen(&self, from_user_id: String, to_user_id: String) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE vible_messages SET seen = TRUE
                WHERE from_user_id = $1 AND to_user_id = $2 AND NOT seen
                "#,
            )
            .bind(&from_user_id)
            .bind(&to_user_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
    }

    fn unseen(&self) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {} FROM vible_messages WHERE NOT seen ORDER BY created_at",
                MESSAGE_COLUMNS
            ))
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(message_from_row).collect::<Result<Vec<_>>>()
        })
    }

    fn recent_conversations(&self, user_id: String) -> StoreFuture<'_, Vec<Message>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                r#"
                SELECT {cols} FROM (
                    SELECT DISTINCT ON (peer) {cols}
                    FROM (
                        SELECT {cols},
                               CASE WHEN from_user_id = $1 THEN to_user_id
                                    ELSE from_user_id END AS peer
                        FROM vible_messages
                        WHERE from_user_id = $1 OR to_user_id = $1
                    ) AS mine
                    ORDER BY peer, created_at DESC
                ) AS latest
                ORDER BY created_at DESC
                "#,
                cols = MESSAGE_COLUMNS
            ))
            .bind(&user_id)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(message_from_row).collect::<Result<Vec<_>>>()
        })
    }
}

impl UserStore for PgStore {
    fn find_user(&self, id: String) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM vible_users WHERE id = $1")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(user_from_row).transpose()
        })
    }

    fn find_by_username(&self, username: String) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM vible_users WHERE username = $1")
                .bind(&username)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(user_from_row).transpose()
        })
    }

    fn create_user(&self, user: User) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO vible_users (id, email, full_name, username, profile_picture, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.username)
            .bind(&user.profile_picture)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn update_user(&self, user: User) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE vible_users
                SET email = $2, full_name = $3, username = $4, profile_picture = $5
                WHERE id = $1
                "#,
            )
            .bind(&user.id)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.username)
            .bind(&user.profile_picture)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(VibleError::NotFound(format!("user {}", user.id)));
            }
            Ok(())
        })
    }

    fn delete_user(&self, id: String) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM vible_users WHERE id = $1")
                .bind(&id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}

impl StoryStore for PgStore {
    fn create_story(&self, story: Story) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO vible_stories (id, user_id, content, media_url, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&story.id)
            .bind(&story.user_id)
            .bind(&story.content)
            .bind(&story.media_url)
            .bind(story.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn find_story(&self, id: String) -> StoreFuture<'_, Option<Story>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM vible_stories WHERE id = $1")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(story_from_row).transpose()
        })
    }

    fn delete_story(&self, id: String) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM vible_stories WHERE id = $1")
                .bind(&id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}

impl ConnectionStore for PgStore {
    fn create_connection(&self, request: ConnectionRequest) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO vible_connections (id, from_user_id, to_user_id, status, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status
                "#,
            )
            .bind(&request.id)
            .bind(&request.from_user_id)
            .bind(&request.to_user_id)
            .bind(request.status.as_str())
            .bind(request.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn find_connection(&self, id: String) -> StoreFuture<'_, Option<ConnectionRequest>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM vible_connections WHERE id = $1")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(connection_from_row).transpose()
        })
    }
}
