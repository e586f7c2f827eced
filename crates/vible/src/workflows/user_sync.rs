//! Mirror identity-provider user lifecycle events into the user store.

use rand::Rng;
use serde::Deserialize;
use serde_json::json;

use vible_core::model::User;
use vible_core::workflow::{StepError, WorkflowDefinition};

use super::WorkflowDeps;

/// Usernames that collide get a random numeric suffix below this bound.
const USERNAME_SUFFIX_BOUND: u32 = 10_000;

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email_addresses: Vec<ProviderEmail>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderEmail {
    email_address: String,
}

impl ProviderUser {
    fn primary_email(&self) -> Result<&str, StepError> {
        self.email_addresses
            .first()
            .map(|e| e.email_address.as_str())
            .ok_or_else(|| StepError::permanent(format!("user {} has no email address", self.id)))
    }

    fn full_name(&self) -> String {
        User::join_name(self.first_name.as_deref(), self.last_name.as_deref())
    }
}

fn username_suffix() -> u32 {
    rand::thread_rng().gen_range(0..USERNAME_SUFFIX_BOUND)
}

#[derive(Debug, Deserialize)]
struct DeletedUser {
    id: String,
}

/// `clerk/user.created`: create the user with a unique username.
pub fn user_created(deps: WorkflowDeps) -> WorkflowDefinition {
    WorkflowDefinition::on_event("sync-user-from-clerk", "clerk/user.created").step(
        "create-user",
        move |ctx| {
            let deps = deps.clone();
            async move {
                let incoming: ProviderUser = ctx.payload()?;

                if let Some(existing) = deps.users.find_user(incoming.id.clone()).await? {
                    return Ok(json!({ "user_id": existing.id, "username": existing.username }));
                }

                let email = incoming.primary_email()?.to_string();
                let mut username = User::username_from_email(&email);
                if deps.users.find_by_username(username.clone()).await?.is_some() {
                    username = format!("{}{}", username, username_suffix());
                }

                let user = User {
                    id: incoming.id.clone(),
                    email,
                    full_name: incoming.full_name(),
                    username: username.clone(),
                    profile_picture: incoming.image_url.clone(),
                    created_at: ctx.now,
                };
                deps.users.create_user(user).await?;
                tracing::info!(user_id = %incoming.id, username = %username, "User created");

                Ok(json!({ "user_id": incoming.id, "username": username }))
            }
        },
    )
}

/// `clerk/user.updated`: refresh email, name and picture. The username is
/// kept. Updates for unknown users are ignored.
pub fn user_updated(deps: WorkflowDeps) -> WorkflowDefinition {
    WorkflowDefinition::on_event("update-user-from-clerk", "clerk/user.updated").step(
        "update-user",
        move |ctx| {
            let deps = deps.clone();
            async move {
                let incoming: ProviderUser = ctx.payload()?;

                let Some(existing) = deps.users.find_user(incoming.id.clone()).await? else {
                    tracing::warn!(user_id = %incoming.id, "Update for unknown user ignored");
                    return Ok(json!({ "updated": false }));
                };

                let user = User {
                    email: incoming.primary_email()?.to_string(),
                    full_name: incoming.full_name(),
                    profile_picture: incoming.image_url.clone(),
                    ..existing
                };
                deps.users.update_user(user).await?;

                Ok(json!({ "updated": true }))
            }
        },
    )
}

/// `clerk/user.delete`
pub fn user_deleted(deps: WorkflowDeps) -> WorkflowDefinition {
    WorkflowDefinition::on_event("delete-user-with-clerk", "clerk/user.delete").step(
        "delete-user",
        move |ctx| {
            let deps = deps.clone();
            async move {
                let DeletedUser { id } = ctx.payload()?;
                let deleted = deps.users.delete_user(id).await?;
                Ok(json!({ "deleted": deleted }))
            }
        },
    )
}
