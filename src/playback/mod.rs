//! Streaming-provider collaborator driving playback on the host's external device.

pub mod simulated;
pub mod spotify;

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub use self::{simulated::SimulatedPlaybackProvider, spotify::SpotifyPlaybackProvider};

/// Result alias for provider calls.
pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// Failures reported by a playback provider.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("streaming account link of `{user_id}` expired")]
    LinkExpired { user_id: String },
    #[error("device `{device_id}` is not available")]
    DeviceUnavailable { device_id: String },
    #[error("failed to reach the streaming provider at `{endpoint}`")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("streaming provider answered {status} for `{endpoint}`")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to decode the streaming provider response for `{endpoint}`")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("playback provider unavailable: {0}")]
    Unavailable(String),
}

/// Credentials a user stored when linking their streaming account.
///
/// Refreshing the token is the client's business; an expired link is reported as such.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLink {
    /// Owner of the link; not part of the stored marker.
    #[serde(skip)]
    pub user_id: String,
    pub access_token: String,
    /// Expiry as unix milliseconds.
    pub expires_at: i64,
}

impl ProviderLink {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// A playback device reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackDevice {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub is_active: bool,
}

/// The track the provider reports as playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayingTrack {
    pub uri: String,
    pub name: String,
    pub progress_ms: u64,
    pub duration_ms: u64,
}

/// Snapshot of the provider's player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub is_playing: bool,
    pub device_id: Option<String>,
    pub track: Option<PlayingTrack>,
}

impl PlaybackState {
    /// Time left on the current track, if one is playing.
    pub fn remaining(&self) -> Option<Duration> {
        let track = self.track.as_ref().filter(|_| self.is_playing)?;
        Some(Duration::from_millis(
            track.duration_ms.saturating_sub(track.progress_ms),
        ))
    }
}

/// Track found in the provider's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    pub uri: String,
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub album_cover_url: Option<String>,
    pub isrc: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Abstraction over the streaming provider controlling the host's device.
pub trait PlaybackProvider: Send + Sync {
    fn active_devices(&self, link: &ProviderLink)
    -> BoxFuture<'static, PlaybackResult<Vec<PlaybackDevice>>>;
    /// `None` when nothing is loaded on the player.
    fn playback_state(
        &self,
        link: &ProviderLink,
    ) -> BoxFuture<'static, PlaybackResult<Option<PlaybackState>>>;
    /// Start `track_uri` immediately on `device_id`.
    fn play(
        &self,
        link: &ProviderLink,
        device_id: &str,
        track_uri: &str,
    ) -> BoxFuture<'static, PlaybackResult<()>>;
    /// Queue `track_uri` to start once the current track finishes.
    fn enqueue_next(
        &self,
        link: &ProviderLink,
        device_id: &str,
        track_uri: &str,
    ) -> BoxFuture<'static, PlaybackResult<()>>;
    /// Up to `limit` catalog tracks matching `query`, best match first.
    fn search_tracks(
        &self,
        link: &ProviderLink,
        query: &str,
        limit: usize,
    ) -> BoxFuture<'static, PlaybackResult<Vec<CatalogTrack>>>;
}
