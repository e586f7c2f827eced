use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile fields read and written by workflow steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identity-provider user id.
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub username: String,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Username derived from the local part of an email address.
    pub fn username_from_email(email: &str) -> String {
        email
            .split('@')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    /// Display name from optional first and last names.
    pub fn join_name(first: Option<&str>, last: Option<&str>) -> String {
        [first, last]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_from_email() {
        assert_eq!(User::username_from_email("jane.doe@example.com"), "jane.doe");
        assert_eq!(User::username_from_email("nodomain"), "nodomain");
    }

    #[test]
    fn test_join_name() {
        assert_eq!(User::join_name(Some("Jane"), Some("Doe")), "Jane Doe");
        assert_eq!(User::join_name(Some("Jane"), None), "Jane");
        assert_eq!(User::join_name(None, None), "");
    }
}
