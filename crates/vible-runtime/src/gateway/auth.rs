use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::response::ApiError;

/// Header carrying the caller's user id, set by the upstream auth proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CallerId(v.to_string()))
            .ok_or_else(|| ApiError::unauthorized("missing user identity"))
    }
}
