//! In-process stand-in for a streaming provider.
//!
//! Each user owns one simulated player. Track progress follows the tokio clock, so tests with
//! paused time can fast-forward through a track.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::time::Instant;

use super::{
    CatalogTrack, PlaybackDevice, PlaybackError, PlaybackProvider, PlaybackResult, PlaybackState, PlayingTrack,
    ProviderLink,
};

/// Command received by a simulated player, recorded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackCommand {
    Play { device_id: String, uri: String },
    EnqueueNext { device_id: String, uri: String },
}

#[derive(Debug, Clone)]
struct Loaded {
    uri: String,
    duration: Duration,
    started_at: Instant,
}

#[derive(Debug, Default)]
struct Player {
    device_id: Option<String>,
    current: Option<Loaded>,
    up_next: VecDeque<String>,
    commands: Vec<PlaybackCommand>,
}

impl Player {
    /// Roll finished tracks over to queued ones, as a real player would.
    fn settle(&mut self, durations: &dyn Fn(&str) -> Duration) {
        let now = Instant::now();
        while let Some(current) = &self.current {
            let ends_at = current.started_at + current.duration;
            if now < ends_at {
                break;
            }
            self.current = self.up_next.pop_front().map(|uri| Loaded {
                duration: durations(&uri),
                uri,
                started_at: ends_at,
            });
        }
    }
}

#[derive(Clone)]
pub struct SimulatedPlaybackProvider {
    inner: Arc<Inner>,
}

struct Inner {
    devices: Vec<PlaybackDevice>,
    default_duration: Duration,
    durations: DashMap<String, Duration>,
    players: DashMap<String, Player>,
    catalog: DashMap<String, CatalogTrack>,
    failing: AtomicBool,
}

impl SimulatedPlaybackProvider {
    /// Build a provider exposing `devices` (id, name) to every user.
    pub fn new(devices: Vec<(String, String)>, default_duration: Duration) -> Self {
        let devices = devices
            .into_iter()
            .map(|(id, name)| PlaybackDevice {
                id,
                name,
                kind: "Speaker".into(),
                is_active: false,
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                devices,
                default_duration,
                durations: DashMap::new(),
                players: DashMap::new(),
                catalog: DashMap::new(),
                failing: AtomicBool::new(false),
            }),
        }
    }

    /// Give `uri` a specific length instead of the default one.
    pub fn set_track_duration(&self, uri: &str, duration: Duration) {
        self.inner.durations.insert(uri.to_string(), duration);
    }

    /// Make `track` findable through searches.
    pub fn add_to_catalog(&self, track: CatalogTrack) {
        if let Some(duration_ms) = track.duration_ms {
            self.set_track_duration(&track.uri, Duration::from_millis(duration_ms));
        }
        self.inner.catalog.insert(track.uri.clone(), track);
    }

    /// Make every subsequent call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Commands the player of `user_id` has received so far.
    pub fn commands(&self, user_id: &str) -> Vec<PlaybackCommand> {
        self.inner
            .players
            .get(user_id)
            .map(|player| player.commands.clone())
            .unwrap_or_default()
    }

    fn duration_of(&self, uri: &str) -> Duration {
        self.inner
            .durations
            .get(uri)
            .map(|entry| *entry)
            .unwrap_or(self.inner.default_duration)
    }

    fn check(&self, device_id: Option<&str>) -> PlaybackResult<()> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(PlaybackError::Unavailable("simulated outage".into()));
        }
        if let Some(device_id) = device_id {
            if !self.inner.devices.iter().any(|device| device.id == device_id) {
                return Err(PlaybackError::DeviceUnavailable {
                    device_id: device_id.to_string(),
                });
            }
        }
        Ok(())
    }

    fn snapshot(&self, user_id: &str) -> Option<PlaybackState> {
        let provider = self.clone();
        let durations = move |uri: &str| provider.duration_of(uri);
        let mut player = self.inner.players.get_mut(user_id)?;
        player.settle(&durations);

        let current = player.current.as_ref()?;
        let elapsed = current.started_at.elapsed().min(current.duration);
        Some(PlaybackState {
            is_playing: true,
            device_id: player.device_id.clone(),
            track: Some(PlayingTrack {
                uri: current.uri.clone(),
                name: current.uri.clone(),
                progress_ms: elapsed.as_millis() as u64,
                duration_ms: current.duration.as_millis() as u64,
            }),
        })
    }

    fn apply(&self, user_id: &str, command: PlaybackCommand) {
        let provider = self.clone();
        let durations = move |uri: &str| provider.duration_of(uri);
        let mut player = self.inner.players.entry(user_id.to_string()).or_default();
        player.settle(&durations);

        match &command {
            PlaybackCommand::Play { device_id, uri } => {
                player.device_id = Some(device_id.clone());
                player.current = Some(Loaded {
                    uri: uri.clone(),
                    duration: durations(uri),
                    started_at: Instant::now(),
                });
            }
            PlaybackCommand::EnqueueNext { device_id, uri } => {
                player.device_id.get_or_insert_with(|| device_id.clone());
                if player.current.is_none() {
                    player.current = Some(Loaded {
                        uri: uri.clone(),
                        duration: durations(uri),
                        started_at: Instant::now(),
                    });
                } else {
                    player.up_next.push_back(uri.clone());
                }
            }
        }
        player.commands.push(command);
    }

    /// Catalog tracks whose name or artist contains `query`, ignoring case.
    fn matching(&self, query: &str, limit: usize) -> Vec<CatalogTrack> {
        let needle = query.trim().to_lowercase();
        let mut found: Vec<CatalogTrack> = self
            .inner
            .catalog
            .iter()
            .filter(|entry| {
                entry.name.to_lowercase().contains(&needle)
                    || entry.artist.to_lowercase().contains(&needle)
            })
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uri.cmp(&b.uri)));
        found.truncate(limit);
        found
    }
}

impl PlaybackProvider for SimulatedPlaybackProvider {
    fn active_devices(
        &self,
        _link: &ProviderLink,
    ) -> BoxFuture<'static, PlaybackResult<Vec<PlaybackDevice>>> {
        let result = self.check(None).map(|()| self.inner.devices.clone());
        Box::pin(async move { result })
    }

    fn playback_state(
        &self,
        link: &ProviderLink,
    ) -> BoxFuture<'static, PlaybackResult<Option<PlaybackState>>> {
        let result = self.check(None).map(|()| self.snapshot(&link.user_id));
        Box::pin(async move { result })
    }

    fn play(
        &self,
        link: &ProviderLink,
        device_id: &str,
        track_uri: &str,
    ) -> BoxFuture<'static, PlaybackResult<()>> {
        let result = self.check(Some(device_id)).map(|()| {
            self.apply(
                &link.user_id,
                PlaybackCommand::Play {
                    device_id: device_id.to_string(),
                    uri: track_uri.to_string(),
                },
            )
        });
        Box::pin(async move { result })
    }

    fn enqueue_next(
        &self,
        link: &ProviderLink,
        device_id: &str,
        track_uri: &str,
    ) -> BoxFuture<'static, PlaybackResult<()>> {
        let result = self.check(Some(device_id)).map(|()| {
            self.apply(
                &link.user_id,
                PlaybackCommand::EnqueueNext {
                    device_id: device_id.to_string(),
                    uri: track_uri.to_string(),
                },
            )
        });
        Box::pin(async move { result })
    }

    fn search_tracks(
        &self,
        _link: &ProviderLink,
        query: &str,
        limit: usize,
    ) -> BoxFuture<'static, PlaybackResult<Vec<CatalogTrack>>> {
        let result = self.check(None).map(|()| self.matching(query, limit));
        Box::pin(async move { result })
    }
}

/// Group recorded commands by kind, handy for assertions.
pub fn count_commands(commands: &[PlaybackCommand]) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for command in commands {
        let kind = match command {
            PlaybackCommand::Play { .. } => "play",
            PlaybackCommand::EnqueueNext { .. } => "enqueue_next",
        };
        *counts.entry(kind).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> ProviderLink {
        ProviderLink {
            user_id: "host".into(),
            access_token: "token".into(),
            expires_at: i64::MAX,
        }
    }

    fn provider() -> SimulatedPlaybackProvider {
        SimulatedPlaybackProvider::new(
            vec![("speaker".into(), "Speaker".into())],
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn queued_track_starts_when_current_ends() {
        let provider = provider();
        provider.play(&link(), "speaker", "track:a").await.unwrap();
        provider.enqueue_next(&link(), "speaker", "track:b").await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        let state = provider.playback_state(&link()).await.unwrap().unwrap();
        assert_eq!(state.track.as_ref().unwrap().uri, "track:a");
        assert_eq!(state.remaining(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(15)).await;
        let state = provider.playback_state(&link()).await.unwrap().unwrap();
        assert_eq!(state.track.as_ref().unwrap().uri, "track:b");
        assert_eq!(state.track.as_ref().unwrap().progress_ms, 5_000);
    }

    fn catalog_track(uri: &str, name: &str, artist: &str) -> CatalogTrack {
        CatalogTrack {
            uri: uri.into(),
            name: name.into(),
            artist: artist.into(),
            album: None,
            album_cover_url: None,
            isrc: None,
            duration_ms: Some(120_000),
        }
    }

    #[tokio::test]
    async fn search_matches_name_or_artist_up_to_limit() {
        let provider = provider();
        provider.add_to_catalog(catalog_track("track:1", "Blue Monday", "New Order"));
        provider.add_to_catalog(catalog_track("track:2", "Ceremony", "New Order"));
        provider.add_to_catalog(catalog_track("track:3", "Blue Line", "Massive Attack"));

        let found = provider.search_tracks(&link(), "  new order ", 5).await.unwrap();
        let uris: Vec<_> = found.iter().map(|track| track.uri.as_str()).collect();
        assert_eq!(uris, ["track:1", "track:2"]);

        let found = provider.search_tracks(&link(), "BLUE", 1).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Blue Line");

        assert!(provider.search_tracks(&link(), "jazz", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_device_and_outage_are_errors() {
        let provider = provider();
        assert!(matches!(
            provider.play(&link(), "nope", "track:a").await,
            Err(PlaybackError::DeviceUnavailable { .. })
        ));

        provider.set_failing(true);
        assert!(provider.active_devices(&link()).await.is_err());
        assert!(provider.commands("host").is_empty());
    }
}
