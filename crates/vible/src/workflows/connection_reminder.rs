//! Email the recipient of a connection request, then remind them a day
//! later unless they have accepted in the meantime.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use vible_core::email::Email;
use vible_core::model::{ConnectionRequest, User};
use vible_core::workflow::{StepError, WorkflowDefinition};

use super::{email_body, escape_html, link, WorkflowDeps};

const REMINDER_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionRequested {
    connection_id: String,
}

/// `app/connection-request {connectionId}`
pub fn connection_reminder(deps: WorkflowDeps) -> WorkflowDefinition {
    let first = deps.clone();
    let reminder = deps;

    WorkflowDefinition::on_event("send-new-connection-request-reminder", "app/connection-request")
        .step("send-connection-request-mail", move |ctx| {
            let deps = first.clone();
            async move {
                let ConnectionRequested { connection_id } = ctx.payload()?;
                let (_, email) = request_email(&deps, &connection_id).await?;
                let to = email.to.clone();
                deps.email.send(email).await?;
                Ok(json!({ "sent_to": to }))
            }
        })
        .sleep("wait-for-24-hours", REMINDER_DELAY)
        .step("send-connection-request-reminder", move |ctx| {
            let deps = reminder.clone();
            async move {
                let ConnectionRequested { connection_id } = ctx.payload()?;
                let (request, email) = request_email(&deps, &connection_id).await?;
                if request.is_accepted() {
                    return Ok(json!({ "message": "Already accepted" }));
                }
                deps.email.send(email).await?;
                Ok(json!({ "message": "Reminder sent." }))
            }
        })
}

/// Load the request with both users and render the notification.
async fn request_email(
    deps: &WorkflowDeps,
    connection_id: &str,
) -> Result<(ConnectionRequest, Email), StepError> {
    let request = deps
        .connections
        .find_connection(connection_id.to_string())
        .await?
        .ok_or_else(|| StepError::permanent(format!("connection {} not found", connection_id)))?;

    let from = find_user(deps, &request.from_user_id).await?;
    let to = find_user(deps, &request.to_user_id).await?;

    let body = email_body(
        &to.full_name,
        &[
            format!(
                "You have a new connection request from {} - @{}",
                escape_html(&from.full_name),
                escape_html(&from.username)
            ),
            format!(
                "Click {} to accept or reject the request",
                link(&format!("{}/connections", deps.frontend_url), "here")
            ),
        ],
    );

    let email = Email {
        to: to.email,
        subject: "👋🏻 New Connection Request".to_string(),
        body,
    };
    Ok((request, email))
}

async fn find_user(deps: &WorkflowDeps, id: &str) -> Result<User, StepError> {
    deps.users
        .find_user(id.to_string())
        .await?
        .ok_or_else(|| StepError::permanent(format!("user {} not found", id)))
}
