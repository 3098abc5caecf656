//! Queue session record stored under `sessions/{id}`.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::dao::repository::Record;

/// Reference to a track on the streaming provider.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    pub uri: String,
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub album_cover_url: Option<String>,
    pub isrc: Option<String>,
    pub duration_ms: Option<u64>,
}

/// A suggested track waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub track: TrackRef,
    pub suggester_username: String,
    /// Set of voters; a user id is present exactly while their vote stands.
    #[serde(default)]
    pub votes: BTreeMap<String, bool>,
    /// Denormalised `votes` size, refreshed after every vote.
    #[serde(default)]
    pub vote_count: u32,
    pub added_at: i64,
}

/// Shared playback queue owned by a host.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub host_user_id: String,
    #[serde(default)]
    pub participants: BTreeMap<String, bool>,
    #[serde(default, deserialize_with = "complete_entries")]
    pub queue: BTreeMap<String, QueueItem>,
    pub created_at: i64,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub current_track: Option<TrackRef>,
    /// Track handed to the player to follow the current one; not playing yet.
    pub next_track: Option<TrackRef>,
    #[serde(default)]
    pub is_ended: bool,
}

impl Record for Session {
    const COLLECTION: &'static str = "sessions";
}

impl Session {
    /// Fresh session whose only participant is the host.
    pub fn new(host_user_id: &str, created_at: i64) -> Self {
        Self {
            host_user_id: host_user_id.to_string(),
            participants: BTreeMap::from([(host_user_id.to_string(), true)]),
            queue: BTreeMap::new(),
            created_at,
            device_id: None,
            device_name: None,
            current_track: None,
            next_track: None,
            is_ended: false,
        }
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_user_id == user_id
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.contains_key(user_id)
    }
}

/// Decode a keyed map, skipping entries that are not complete records.
///
/// A vote landing on an item that was just played leaves a lone `votes` fragment; such
/// entries are not queue items and must not poison the whole session.
pub(crate) fn complete_entries<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| serde_json::from_value(value).ok().map(|item| (key, item)))
        .collect())
}

/// Pick the queue item to play next.
///
/// Highest `voteCount` wins; ties go to the earliest `addedAt`, then to the smallest item id,
/// so every replica of the same queue picks the same item.
pub fn select_next_track(queue: &BTreeMap<String, QueueItem>) -> Option<(&String, &QueueItem)> {
    queue.iter().min_by(|a, b| playback_order(*a, *b))
}

/// Queue order: the item [`select_next_track`] picks comes first.
pub fn playback_order(a: (&String, &QueueItem), b: (&String, &QueueItem)) -> Ordering {
    b.1.vote_count
        .cmp(&a.1.vote_count)
        .then_with(|| a.1.added_at.cmp(&b.1.added_at))
        .then_with(|| a.0.cmp(b.0))
}
