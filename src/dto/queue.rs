use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::validation::{validate_non_blank, validate_record_key},
    playback::CatalogTrack,
    state::session::{QueueItem, Session, TrackRef, playback_order},
};

/// Track suggested by a participant.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackInput {
    /// Provider identifier, e.g. `spotify:track:…`.
    #[validate(custom(function = "validate_non_blank"))]
    pub uri: String,
    #[validate(custom(function = "validate_non_blank"))]
    pub name: String,
    #[validate(custom(function = "validate_non_blank"))]
    pub artist: String,
    pub album: Option<String>,
    pub album_cover_url: Option<String>,
    pub isrc: Option<String>,
    pub duration_ms: Option<u64>,
}

impl From<TrackInput> for TrackRef {
    fn from(value: TrackInput) -> Self {
        Self {
            uri: value.uri,
            name: value.name,
            artist: value.artist,
            album: value.album,
            album_cover_url: value.album_cover_url,
            isrc: value.isrc,
            duration_ms: value.duration_ms,
        }
    }
}

impl From<TrackRef> for TrackInput {
    fn from(value: TrackRef) -> Self {
        Self {
            uri: value.uri,
            name: value.name,
            artist: value.artist,
            album: value.album,
            album_cover_url: value.album_cover_url,
            isrc: value.isrc,
            duration_ms: value.duration_ms,
        }
    }
}

impl From<CatalogTrack> for TrackInput {
    fn from(value: CatalogTrack) -> Self {
        Self {
            uri: value.uri,
            name: value.name,
            artist: value.artist,
            album: value.album,
            album_cover_url: value.album_cover_url,
            isrc: value.isrc,
            duration_ms: value.duration_ms,
        }
    }
}

/// Query string of a track search.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchTracksQuery {
    /// Free-text search over track names and artists.
    pub q: String,
}

/// Tracks a participant can pick from to suggest one.
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchTracksResponse {
    pub results: Vec<TrackInput>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct EnqueueTrackRequest {
    #[validate(nested)]
    pub track: TrackInput,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueTrackResponse {
    pub success: bool,
    pub queue_item_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub success: bool,
    /// Whether the caller's vote stands after the toggle.
    pub voted: bool,
    /// Recomputed vote count of the item.
    pub vote_count: u32,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SelectDeviceRequest {
    #[validate(custom(function = "validate_record_key"))]
    pub device_id: String,
    #[validate(custom(function = "validate_non_blank"))]
    pub device_name: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceQueueResponse {
    pub success: bool,
    pub message: String,
    pub played_track: Option<TrackInput>,
}

/// Queue entry as presented to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueItemView {
    pub id: String,
    pub track: TrackInput,
    pub suggester_username: String,
    pub votes: Vec<String>,
    pub vote_count: u32,
    pub added_at: i64,
}

impl QueueItemView {
    fn new(id: &str, item: &QueueItem) -> Self {
        Self {
            id: id.to_string(),
            track: item.track.clone().into(),
            suggester_username: item.suggester_username.clone(),
            votes: item.votes.keys().cloned().collect(),
            vote_count: item.vote_count,
            added_at: item.added_at,
        }
    }
}

/// Session snapshot; the queue is listed in playback order.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub host_user_id: String,
    pub participants: Vec<String>,
    pub queue: Vec<QueueItemView>,
    pub created_at: i64,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub current_track: Option<TrackInput>,
    pub next_track: Option<TrackInput>,
    pub is_ended: bool,
}

impl SessionView {
    pub fn new(id: &str, session: Session) -> Self {
        let mut ordered: Vec<_> = session.queue.iter().collect();
        ordered.sort_by(|a, b| playback_order(*a, *b));
        let queue = ordered
            .into_iter()
            .map(|(item_id, item)| QueueItemView::new(item_id, item))
            .collect();

        Self {
            id: id.to_string(),
            host_user_id: session.host_user_id,
            participants: session.participants.into_keys().collect(),
            queue,
            created_at: session.created_at,
            device_id: session.device_id,
            device_name: session.device_name,
            current_track: session.current_track.map(Into::into),
            next_track: session.next_track.map(Into::into),
            is_ended: session.is_ended,
        }
    }
}
