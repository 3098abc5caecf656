//! Spotify Web API player endpoints.

use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    CatalogTrack, PlaybackDevice, PlaybackError, PlaybackProvider, PlaybackResult, PlaybackState, PlayingTrack,
    ProviderLink,
};

const DEVICES: &str = "/v1/me/player/devices";
const PLAYER: &str = "/v1/me/player";
const PLAY: &str = "/v1/me/player/play";
const QUEUE: &str = "/v1/me/player/queue";
const SEARCH: &str = "/v1/search";

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<SpotifyDevice>,
}

#[derive(Debug, Deserialize)]
struct SpotifyDevice {
    id: Option<String>,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    #[serde(default)]
    is_playing: bool,
    progress_ms: Option<u64>,
    device: Option<PlayerDevice>,
    item: Option<PlayerItem>,
}

#[derive(Debug, Deserialize)]
struct PlayerDevice {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayerItem {
    uri: String,
    name: String,
    duration_ms: u64,
}

impl From<PlayerResponse> for PlaybackState {
    fn from(value: PlayerResponse) -> Self {
        let progress_ms = value.progress_ms.unwrap_or(0);
        Self {
            is_playing: value.is_playing,
            device_id: value.device.and_then(|device| device.id),
            track: value.item.map(|item| PlayingTrack {
                uri: item.uri,
                name: item.name,
                progress_ms,
                duration_ms: item.duration_ms,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Option<SearchPage>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<NamedEntity>,
    album: Option<SearchAlbum>,
    duration_ms: Option<u64>,
    external_ids: Option<ExternalIds>,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchAlbum {
    name: String,
    #[serde(default)]
    images: Vec<AlbumImage>,
}

#[derive(Debug, Deserialize)]
struct AlbumImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    isrc: Option<String>,
}

impl SearchResponse {
    fn into_tracks(self) -> Vec<CatalogTrack> {
        let items = self.tracks.map(|page| page.items).unwrap_or_default();
        items
            .into_iter()
            .filter_map(|item| {
                // Tracks without a credited artist cannot be displayed in the queue.
                let artist = item.artists.into_iter().next()?.name;
                let (album, album_cover_url) = match item.album {
                    Some(album) => (
                        Some(album.name),
                        album.images.into_iter().next().map(|image| image.url),
                    ),
                    None => (None, None),
                };
                Some(CatalogTrack {
                    uri: item.uri,
                    name: item.name,
                    artist,
                    album,
                    album_cover_url,
                    isrc: item.external_ids.and_then(|ids| ids.isrc),
                    duration_ms: item.duration_ms,
                })
            })
            .collect()
    }
}

/// Provider talking to the Spotify Web API with the host's stored access token.
#[derive(Clone)]
pub struct SpotifyPlaybackProvider {
    client: Client,
    base_url: Arc<str>,
}

impl SpotifyPlaybackProvider {
    pub fn new(base_url: &str) -> PlaybackResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| PlaybackError::Request {
                endpoint: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    fn request(&self, method: Method, endpoint: &str, link: &ProviderLink) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, endpoint))
            .bearer_auth(&link.access_token)
    }

    async fn send(endpoint: &str, builder: RequestBuilder) -> PlaybackResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|source| PlaybackError::Request {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            debug!(endpoint, %status, "Spotify rejected the request");
            Err(PlaybackError::Status {
                endpoint: endpoint.to_string(),
                status,
            })
        }
    }
}

impl PlaybackProvider for SpotifyPlaybackProvider {
    fn active_devices(
        &self,
        link: &ProviderLink,
    ) -> BoxFuture<'static, PlaybackResult<Vec<PlaybackDevice>>> {
        let builder = self.request(Method::GET, DEVICES, link);
        Box::pin(async move {
            let response = Self::send(DEVICES, builder).await?;
            let payload = response
                .json::<DevicesResponse>()
                .await
                .map_err(|source| PlaybackError::Decode {
                    endpoint: DEVICES.to_string(),
                    source,
                })?;

            Ok(payload
                .devices
                .into_iter()
                .filter_map(|device| {
                    // Restricted devices come back without an id and cannot be targeted.
                    let id = device.id?;
                    Some(PlaybackDevice {
                        id,
                        name: device.name,
                        kind: device.kind,
                        is_active: device.is_active,
                    })
                })
                .collect())
        })
    }

    fn playback_state(
        &self,
        link: &ProviderLink,
    ) -> BoxFuture<'static, PlaybackResult<Option<PlaybackState>>> {
        let builder = self.request(Method::GET, PLAYER, link);
        Box::pin(async move {
            let response = Self::send(PLAYER, builder).await?;
            if response.status() == StatusCode::NO_CONTENT {
                return Ok(None);
            }
            let payload = response
                .json::<PlayerResponse>()
                .await
                .map_err(|source| PlaybackError::Decode {
                    endpoint: PLAYER.to_string(),
                    source,
                })?;
            Ok(Some(payload.into()))
        })
    }

    fn play(
        &self,
        link: &ProviderLink,
        device_id: &str,
        track_uri: &str,
    ) -> BoxFuture<'static, PlaybackResult<()>> {
        let builder = self
            .request(Method::PUT, PLAY, link)
            .query(&[("device_id", device_id)])
            .json(&json!({ "uris": [track_uri] }));
        Box::pin(async move {
            Self::send(PLAY, builder).await?;
            Ok(())
        })
    }

    fn enqueue_next(
        &self,
        link: &ProviderLink,
        device_id: &str,
        track_uri: &str,
    ) -> BoxFuture<'static, PlaybackResult<()>> {
        let builder = self
            .request(Method::POST, QUEUE, link)
            .query(&[("uri", track_uri), ("device_id", device_id)]);
        Box::pin(async move {
            Self::send(QUEUE, builder).await?;
            Ok(())
        })
    }

    fn search_tracks(
        &self,
        link: &ProviderLink,
        query: &str,
        limit: usize,
    ) -> BoxFuture<'static, PlaybackResult<Vec<CatalogTrack>>> {
        let limit = limit.to_string();
        let builder = self
            .request(Method::GET, SEARCH, link)
            .query(&[("q", query), ("type", "track"), ("limit", limit.as_str())]);
        Box::pin(async move {
            let response = Self::send(SEARCH, builder).await?;
            let payload = response
                .json::<SearchResponse>()
                .await
                .map_err(|source| PlaybackError::Decode {
                    endpoint: SEARCH.to_string(),
                    source,
                })?;
            Ok(payload.into_tracks())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_payload_maps_to_state() {
        let payload: PlayerResponse = serde_json::from_value(json!({
            "is_playing": true,
            "progress_ms": 1_500,
            "device": {"id": "dev-1", "name": "Kitchen"},
            "item": {"uri": "spotify:track:1", "name": "One", "duration_ms": 200_000}
        }))
        .unwrap();

        let state = PlaybackState::from(payload);
        assert_eq!(state.device_id.as_deref(), Some("dev-1"));
        assert_eq!(state.track.as_ref().unwrap().progress_ms, 1_500);
        assert_eq!(state.remaining().unwrap().as_millis(), 198_500);
    }

    #[test]
    fn search_payload_maps_to_catalog_tracks() {
        let payload: SearchResponse = serde_json::from_value(json!({
            "tracks": {"items": [
                {
                    "uri": "spotify:track:1",
                    "name": "One",
                    "artists": [{"name": "First"}, {"name": "Featured"}],
                    "album": {"name": "Debut", "images": [{"url": "https://img/large"}, {"url": "https://img/small"}]},
                    "duration_ms": 200_000,
                    "external_ids": {"isrc": "USRC17607839"}
                },
                {"uri": "spotify:track:2", "name": "Anonymous", "artists": []},
                {"uri": "spotify:track:3", "name": "Bare", "artists": [{"name": "Solo"}]}
            ]}
        }))
        .unwrap();

        let tracks = payload.into_tracks();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].artist, "First");
        assert_eq!(tracks[0].album.as_deref(), Some("Debut"));
        assert_eq!(tracks[0].album_cover_url.as_deref(), Some("https://img/large"));
        assert_eq!(tracks[0].isrc.as_deref(), Some("USRC17607839"));
        assert_eq!(tracks[1].uri, "spotify:track:3");
        assert_eq!(tracks[1].album, None);
    }

    #[test]
    fn search_without_track_page_is_empty() {
        let payload: SearchResponse = serde_json::from_value(json!({})).unwrap();
        assert!(payload.into_tracks().is_empty());
    }

    #[test]
    fn devices_without_id_are_skipped_by_decoder_shape() {
        let payload: DevicesResponse = serde_json::from_value(json!({
            "devices": [
                {"id": null, "name": "Restricted", "type": "Speaker", "is_active": false},
                {"id": "d2", "name": "Phone", "type": "Smartphone", "is_active": true}
            ]
        }))
        .unwrap();

        let usable: Vec<_> = payload.devices.iter().filter(|d| d.id.is_some()).collect();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].kind, "Smartphone");
    }
}
