use tracing::{debug, info};

use crate::{
    dto::user::{Caller, LinkProviderRequest},
    error::ServiceError,
    playback::{PlaybackError, ProviderLink},
    state::{SharedState, now_millis},
};

/// Name shown for users that never sent a display name.
pub const ANONYMOUS: &str = "Anonymous";

/// Store the caller's streaming account credentials.
pub async fn link_provider(
    state: &SharedState,
    caller: &Caller,
    request: LinkProviderRequest,
) -> Result<(), ServiceError> {
    let users = state.users().await?;
    let link = ProviderLink {
        user_id: caller.user_id.clone(),
        access_token: request.access_token,
        expires_at: request.expires_at,
    };
    let value = serde_json::to_value(&link)
        .map_err(|err| ServiceError::Internal(format!("failed to encode provider link: {err}")))?;
    users.set_provider_link(&caller.user_id, value).await?;
    remember_display_name(state, caller).await?;

    info!(user_id = %caller.user_id, "streaming account linked");
    Ok(())
}

/// Load a usable provider link for `user_id`.
///
/// A missing or expired link is a precondition failure: the user has to (re)link first.
pub async fn provider_link(state: &SharedState, user_id: &str) -> Result<ProviderLink, ServiceError> {
    let users = state.users().await?;
    let Some(raw) = users.provider_link(user_id).await? else {
        return Err(ServiceError::FailedPrecondition(
            "Link a streaming account before hosting a session.".into(),
        ));
    };

    let mut link: ProviderLink = serde_json::from_value(raw)
        .map_err(|err| ServiceError::Internal(format!("stored provider link is unreadable: {err}")))?;
    link.user_id = user_id.to_string();

    if link.is_expired(now_millis()) {
        return Err(PlaybackError::LinkExpired {
            user_id: user_id.to_string(),
        }
        .into());
    }
    Ok(link)
}

/// Persist the display name the caller sent, if any.
pub async fn remember_display_name(state: &SharedState, caller: &Caller) -> Result<(), ServiceError> {
    let Some(name) = caller.display_name.as_deref().map(str::trim) else {
        return Ok(());
    };
    if name.is_empty() {
        return Ok(());
    }
    state.users().await?.set_username(&caller.user_id, name).await?;
    debug!(user_id = %caller.user_id, "display name stored");
    Ok(())
}

/// Display name of the caller: the header value, else the stored one, else [`ANONYMOUS`].
pub async fn display_name(state: &SharedState, caller: &Caller) -> Result<String, ServiceError> {
    if let Some(name) = caller
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return Ok(name.to_string());
    }
    let stored = state.users().await?.username(&caller.user_id).await?;
    Ok(stored.unwrap_or_else(|| ANONYMOUS.to_string()))
}
