use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{dao::tree::path::validate_key, dto::user::Caller, error::AppError};

/// Header carrying the authenticated user id, set by the identity layer in front of the API.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional header carrying the caller's display name.
pub const USER_NAME_HEADER: &str = "x-user-name";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(format!("missing caller identity header `{USER_ID_HEADER}`"))
        })?;
        validate_key(user_id)
            .map_err(|reason| AppError::Unauthorized(format!("unusable user id: {reason}")))?;

        let caller = Caller::new(user_id);
        Ok(match header(parts, USER_NAME_HEADER) {
            Some(name) => caller.with_display_name(name),
            None => caller,
        })
    }
}
