//! Background task that keeps a session's player fed from its queue.
//!
//! One monitor runs per session, on behalf of the host, from device selection until the
//! session ends or disappears.

use std::time::Duration;

use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::user::Caller,
    error::ServiceError,
    playback::PlaybackState,
    services::{
        queue_service::{self, AdvanceMode, EMPTY_QUEUE_MESSAGE},
        user_service,
    },
    state::{SharedState, TaskHandle},
};

/// Decides when the monitor advances the queue.
///
/// The guard remembers the track whose ending already triggered an advance, so repeated polls
/// during the same final window hand over exactly one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceGuard {
    started: bool,
    ending: Option<String>,
}

impl AdvanceGuard {
    /// Action to take for one poll, updating the guard as if it succeeds.
    pub fn next_action(
        &mut self,
        playback: Option<&PlaybackState>,
        queue_has_tracks: bool,
        buffer: Duration,
    ) -> Option<AdvanceMode> {
        let loaded = playback.and_then(|state| state.track.as_ref());

        if let Some(track) = loaded
            && self.ending.as_deref().is_some_and(|uri| uri != track.uri)
        {
            self.ending = None;
        }

        if !queue_has_tracks {
            return None;
        }

        // Nothing handed over yet, or the player ran dry.
        if !self.started || loaded.is_none() {
            self.started = true;
            self.ending = None;
            return Some(AdvanceMode::Play);
        }

        let track = loaded?;
        let remaining = playback.and_then(PlaybackState::remaining)?;
        if remaining < buffer && self.ending.as_deref() != Some(track.uri.as_str()) {
            self.ending = Some(track.uri.clone());
            return Some(AdvanceMode::EnqueueNext);
        }
        None
    }

    /// Forget the effect of an action that failed so the next poll retries it.
    pub fn release(&mut self, mode: AdvanceMode) {
        match mode {
            AdvanceMode::Play => self.started = false,
            AdvanceMode::EnqueueNext => self.ending = None,
        }
    }
}

enum Poll {
    Continue,
    Stop,
}

/// Start (or restart) the monitor of `session_id`.
pub fn spawn(state: &SharedState, session_id: &str, host_user_id: &str) {
    let id = Uuid::new_v4();
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(run(
        state.clone(),
        session_id.to_string(),
        id,
        Caller::new(host_user_id),
        stop_rx,
    ));
    state.register_monitor(session_id, TaskHandle::new(id, stop_tx, task));
    info!(session_id, "playback monitor started");
}

async fn run(
    state: SharedState,
    session_id: String,
    id: Uuid,
    host: Caller,
    mut stop: watch::Receiver<bool>,
) {
    let buffer = state.config().ending_buffer;
    let mut ticker = interval(state.config().monitor_poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut guard = AdvanceGuard::default();

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match poll(&state, &session_id, &host, &mut guard, buffer).await {
            Ok(Poll::Continue) => {}
            Ok(Poll::Stop) => break,
            Err(err) => warn!(session_id = %session_id, error = %err, "playback poll failed"),
        }
    }

    state.forget_monitor(&session_id, id);
    info!(session_id = %session_id, "playback monitor stopped");
}

async fn poll(
    state: &SharedState,
    session_id: &str,
    host: &Caller,
    guard: &mut AdvanceGuard,
    buffer: Duration,
) -> Result<Poll, ServiceError> {
    let Some(session) = state.sessions().await?.find(session_id).await? else {
        return Ok(Poll::Stop);
    };
    if session.is_ended {
        return Ok(Poll::Stop);
    }

    let link = user_service::provider_link(state, &host.user_id).await?;
    let playback = state.playback().playback_state(&link).await?;
    let playing_uri = playback
        .as_ref()
        .and_then(|state| state.track.as_ref())
        .map(|track| track.uri.as_str());
    queue_service::promote_next_track(state, session_id, &session, playing_uri).await?;

    let Some(mode) = guard.next_action(playback.as_ref(), !session.queue.is_empty(), buffer) else {
        return Ok(Poll::Continue);
    };

    match queue_service::advance_with(state, session_id, host, mode).await {
        Ok(response) if response.message == EMPTY_QUEUE_MESSAGE => {
            guard.release(mode);
            Ok(Poll::Continue)
        }
        Ok(response) => {
            debug!(session_id, ?mode, message = %response.message, "monitor advanced the queue");
            Ok(Poll::Continue)
        }
        Err(ServiceError::NotFound(_)) => Ok(Poll::Stop),
        Err(err) => {
            guard.release(mode);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        dto::queue::TrackInput,
        playback::{PlayingTrack, simulated::count_commands},
        services::testing,
    };

    use super::*;

    const BUFFER: Duration = Duration::from_secs(10);

    fn playing(uri: &str, progress_ms: u64) -> PlaybackState {
        PlaybackState {
            is_playing: true,
            device_id: Some("speaker".into()),
            track: Some(PlayingTrack {
                uri: uri.into(),
                name: uri.into(),
                progress_ms,
                duration_ms: 30_000,
            }),
        }
    }

    #[test]
    fn first_poll_plays_once_queue_has_tracks() {
        let mut guard = AdvanceGuard::default();
        assert_eq!(guard.next_action(None, false, BUFFER), None);
        assert_eq!(guard.next_action(None, true, BUFFER), Some(AdvanceMode::Play));
    }

    #[test]
    fn ending_track_triggers_once_across_polls() {
        let mut guard = AdvanceGuard::default();
        guard.next_action(None, true, BUFFER);

        assert_eq!(guard.next_action(Some(&playing("a", 5_000)), true, BUFFER), None);
        let triggers = (0..10)
            .filter_map(|n| guard.next_action(Some(&playing("a", 21_000 + n * 500)), true, BUFFER))
            .collect::<Vec<_>>();
        assert_eq!(triggers, vec![AdvanceMode::EnqueueNext]);

        // The next track resets the guard and triggers again near its end.
        assert_eq!(guard.next_action(Some(&playing("b", 1_000)), true, BUFFER), None);
        assert_eq!(
            guard.next_action(Some(&playing("b", 25_000)), true, BUFFER),
            Some(AdvanceMode::EnqueueNext)
        );
    }

    #[test]
    fn failed_advance_is_retried() {
        let mut guard = AdvanceGuard::default();
        guard.next_action(None, true, BUFFER);
        let ending = playing("a", 25_000);

        assert_eq!(guard.next_action(Some(&ending), true, BUFFER), Some(AdvanceMode::EnqueueNext));
        guard.release(AdvanceMode::EnqueueNext);
        assert_eq!(guard.next_action(Some(&ending), true, BUFFER), Some(AdvanceMode::EnqueueNext));
    }

    #[test]
    fn empty_queue_never_triggers() {
        let mut guard = AdvanceGuard::default();
        guard.next_action(None, true, BUFFER);
        assert_eq!(guard.next_action(Some(&playing("a", 29_000)), false, BUFFER), None);
    }

    fn track(uri: &str) -> TrackInput {
        TrackInput {
            uri: uri.into(),
            name: uri.into(),
            artist: "Artist".into(),
            album: None,
            album_cover_url: None,
            isrc: None,
            duration_ms: Some(30_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_hands_over_each_track_once() {
        let ctx = testing::context().await;
        let id = queue_service::create_session(&ctx.state, &ctx.host)
            .await
            .unwrap()
            .session_id;
        for uri in ["t1", "t2", "t3"] {
            queue_service::enqueue_track(&ctx.state, &id, &ctx.host, track(uri))
                .await
                .unwrap();
        }

        testing::set_device(&ctx, &id).await;
        spawn(&ctx.state, &id, "host");

        // First poll starts t1; polls every 5s inside t1's last 10s enqueue t2 once.
        tokio::time::sleep(Duration::from_secs(28)).await;
        let counts = count_commands(&ctx.playback.commands("host"));
        assert_eq!(counts.get("play"), Some(&1));
        assert_eq!(counts.get("enqueue_next"), Some(&1));

        // t2 is only handed over; t1 is still what plays.
        let view = queue_service::get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert_eq!(view.current_track.unwrap().uri, "t1");
        assert_eq!(view.next_track.unwrap().uri, "t2");

        // t2 starts at 30s and ends at 60s; t3 is handed over once in that window.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let counts = count_commands(&ctx.playback.commands("host"));
        assert_eq!(counts.get("play"), Some(&1));
        assert_eq!(counts.get("enqueue_next"), Some(&2));

        let view = queue_service::get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert!(view.queue.is_empty());
        assert_eq!(view.current_track.unwrap().uri, "t2");
        assert_eq!(view.next_track.unwrap().uri, "t3");

        // Once t3 starts playing it becomes the current track.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let view = queue_service::get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert_eq!(view.current_track.unwrap().uri, "t3");
        assert!(view.next_track.is_none());

        queue_service::end_session(&ctx.state, &id, &ctx.host).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!ctx.state.has_monitor(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_of_a_vanished_session_cleans_up() {
        let ctx = testing::context().await;
        let id = queue_service::create_session(&ctx.state, &ctx.host)
            .await
            .unwrap()
            .session_id;
        queue_service::enqueue_track(&ctx.state, &id, &ctx.host, track("t1"))
            .await
            .unwrap();
        testing::set_device(&ctx, &id).await;
        spawn(&ctx.state, &id, "host");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(ctx.state.tracks_session(&id));

        ctx.state.sessions().await.unwrap().remove(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!ctx.state.has_monitor(&id));
        assert!(!ctx.state.tracks_session(&id));
    }
}
