//! Voted playback queue: session lifecycle, suggestions, votes and queue advancement.
//!
//! Every operation validates and authorizes before writing. Reads and writes go through the
//! session repository, so a session removed underneath an operation surfaces as `NotFound`.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        repository::HostingSlot,
        tree::{TransactionOutcome, TransactionStep, TreePath, path::push_id},
    },
    dto::{
        queue::{
            AdvanceQueueResponse, CreateSessionResponse, EnqueueTrackResponse, SearchTracksResponse,
            SelectDeviceRequest, SessionView, TrackInput, VoteResponse,
        },
        user::Caller,
    },
    error::ServiceError,
    playback::{PlaybackDevice, PlaybackState},
    services::{playback_monitor, user_service},
    state::{
        SessionRepository, SharedState, now_millis,
        session::{QueueItem, Session, TrackRef, select_next_track},
    },
};

/// How the next track is handed to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    /// Start the track right away.
    Play,
    /// Queue the track behind the one currently playing.
    EnqueueNext,
}

pub const EMPTY_QUEUE_MESSAGE: &str = "Queue is empty.";

/// Number of tracks a search returns.
pub const SEARCH_RESULT_LIMIT: usize = 6;

fn field(keys: &[&str]) -> Result<TreePath, ServiceError> {
    Ok(TreePath::from_keys(keys)?)
}

fn ensure_host(session: &Session, caller: &Caller, action: &str) -> Result<(), ServiceError> {
    if session.is_host(&caller.user_id) {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(format!(
            "Only the host can {action}."
        )))
    }
}

fn ensure_participant(session: &Session, caller: &Caller) -> Result<(), ServiceError> {
    if session.is_participant(&caller.user_id) {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(
            "You are not a participant of this session.".into(),
        ))
    }
}

fn ensure_live(session: &Session) -> Result<(), ServiceError> {
    if session.is_ended {
        Err(ServiceError::FailedPrecondition("The session has ended.".into()))
    } else {
        Ok(())
    }
}

/// Create a session hosted by the caller, or hand back the one they already host.
pub async fn create_session(
    state: &SharedState,
    caller: &Caller,
) -> Result<CreateSessionResponse, ServiceError> {
    let users = state.users().await?;
    if !users.has_provider_link(&caller.user_id).await? {
        return Err(ServiceError::FailedPrecondition(
            "Link a streaming account before hosting a session.".into(),
        ));
    }
    user_service::remember_display_name(state, caller).await?;

    let sessions = state.sessions().await?;
    if let Some(existing) = users.hosting(&caller.user_id, HostingSlot::Session).await? {
        if let Some(session) = sessions.find(&existing).await?
            && !session.is_ended
            && session.is_host(&caller.user_id)
        {
            info!(session_id = %existing, user_id = %caller.user_id, "host rejoined session");
            return Ok(CreateSessionResponse {
                session_id: existing,
            });
        }
    }

    let session_id = sessions
        .create(&Session::new(&caller.user_id, now_millis()))
        .await?;
    users
        .set_hosting(&caller.user_id, HostingSlot::Session, Some(&session_id))
        .await?;

    info!(session_id = %session_id, host = %caller.user_id, "session created");
    Ok(CreateSessionResponse { session_id })
}

/// Add the caller to the session's participants. Joining twice is a no-op.
pub async fn join_session(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
) -> Result<(), ServiceError> {
    let sessions = state.sessions().await?;
    let session = sessions.get(session_id).await?;
    ensure_live(&session)?;
    user_service::remember_display_name(state, caller).await?;

    if session.is_participant(&caller.user_id) {
        return Ok(());
    }
    sessions
        .update_fields(
            session_id,
            vec![(field(&["participants", caller.user_id.as_str()])?, Value::Bool(true))],
        )
        .await?;

    info!(session_id, user_id = %caller.user_id, "participant joined session");
    Ok(())
}

/// Participant view of a session, including ended ones still awaiting removal.
pub async fn get_session(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
) -> Result<SessionView, ServiceError> {
    let session = state.sessions().await?.get(session_id).await?;
    ensure_participant(&session, caller)?;
    Ok(SessionView::new(session_id, session))
}

/// Suggest a track; returns the id of the new queue item.
pub async fn enqueue_track(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
    track: TrackInput,
) -> Result<EnqueueTrackResponse, ServiceError> {
    if [&track.uri, &track.name, &track.artist]
        .iter()
        .any(|value| value.trim().is_empty())
    {
        return Err(ServiceError::InvalidArgument(
            "A track needs a uri, a name and an artist.".into(),
        ));
    }

    let sessions = state.sessions().await?;
    let session = sessions.get(session_id).await?;
    ensure_participant(&session, caller)?;
    ensure_live(&session)?;

    let item = QueueItem {
        track: TrackRef::from(track),
        suggester_username: user_service::display_name(state, caller).await?,
        votes: Default::default(),
        vote_count: 0,
        added_at: now_millis(),
    };
    let value = serde_json::to_value(&item)
        .map_err(|err| ServiceError::Internal(format!("failed to encode queue item: {err}")))?;

    let queue_item_id = push_id();
    sessions
        .update_fields(session_id, vec![(field(&["queue", queue_item_id.as_str()])?, value)])
        .await?;

    debug!(session_id, queue_item_id = %queue_item_id, uri = %item.track.uri, "track enqueued");
    Ok(EnqueueTrackResponse {
        success: true,
        queue_item_id,
    })
}

/// Toggle the caller's vote on a queue item, then refresh the item's vote count.
///
/// The toggle is atomic; the count refresh is a separate best-effort write, so readers may
/// briefly see a `voteCount` that lags `votes`.
pub async fn vote_for_track(
    state: &SharedState,
    session_id: &str,
    item_id: &str,
    caller: &Caller,
) -> Result<VoteResponse, ServiceError> {
    let sessions = state.sessions().await?;
    let session = sessions.get(session_id).await?;
    ensure_participant(&session, caller)?;
    ensure_live(&session)?;

    let missing = || ServiceError::NotFound("Track not found in the queue.".into());
    if !session.queue.contains_key(item_id) {
        return Err(missing());
    }
    let item_path = field(&["queue", item_id]).map_err(|_| missing())?;

    let outcome = sessions
        .atomic_update(
            session_id,
            &item_path.child("votes")?.child(&caller.user_id)?,
            Box::new(|current| match current {
                Some(_) => TransactionStep::Remove,
                None => TransactionStep::Set(Value::Bool(true)),
            }),
        )
        .await?;
    let voted = match outcome {
        TransactionOutcome::Committed(value) => value.is_some(),
        TransactionOutcome::Aborted(_) | TransactionOutcome::Conflicted => {
            warn!(session_id, item_id, user_id = %caller.user_id, "vote toggle kept conflicting");
            return Err(ServiceError::Internal(
                "Failed to update vote due to conflicting data.".into(),
            ));
        }
    };

    let item = sessions.read_field(session_id, &item_path).await?;
    let Some(item) = item.filter(|item| item.get("track").is_some()) else {
        // The item was played while we voted; drop the vote fragment we just created.
        if let Err(err) = sessions.remove_field(session_id, &item_path).await {
            warn!(session_id, item_id, error = %err, "failed to clean up vote fragment");
        }
        return Err(missing());
    };

    let vote_count = item
        .get("votes")
        .and_then(Value::as_object)
        .map_or(0, |votes| votes.len()) as u32;
    if let Err(err) =
        refresh_vote_count(&sessions, session_id, &item_path, vote_count).await
    {
        warn!(session_id, item_id, error = %err, "vote count refresh failed; count may lag");
    }

    debug!(session_id, item_id, user_id = %caller.user_id, voted, vote_count, "vote toggled");
    Ok(VoteResponse {
        success: true,
        voted,
        vote_count,
    })
}

async fn refresh_vote_count(
    sessions: &SessionRepository,
    session_id: &str,
    item_path: &TreePath,
    vote_count: u32,
) -> Result<(), ServiceError> {
    sessions
        .update_fields(
            session_id,
            vec![(item_path.child("voteCount")?, json!(vote_count))],
        )
        .await?;
    Ok(())
}

/// Search the provider catalog through the host's linked account.
pub async fn search_tracks(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
    query: &str,
) -> Result<SearchTracksResponse, ServiceError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "Missing or invalid search query.".into(),
        ));
    }

    let session = state.sessions().await?.get(session_id).await?;
    ensure_participant(&session, caller)?;

    let link = user_service::provider_link(state, &session.host_user_id).await?;
    let found = state
        .playback()
        .search_tracks(&link, query, SEARCH_RESULT_LIMIT)
        .await?;
    debug!(session_id, user_id = %caller.user_id, results = found.len(), "track search");
    Ok(SearchTracksResponse {
        results: found.into_iter().map(TrackInput::from).collect(),
    })
}

/// Devices the host can play on.
pub async fn list_devices(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
) -> Result<Vec<PlaybackDevice>, ServiceError> {
    let session = state.sessions().await?.get(session_id).await?;
    ensure_host(&session, caller, "list playback devices")?;

    let link = user_service::provider_link(state, &session.host_user_id).await?;
    Ok(state.playback().active_devices(&link).await?)
}

/// Pick the device the session plays on and start watching its playback.
pub async fn select_device(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
    request: SelectDeviceRequest,
) -> Result<(), ServiceError> {
    let sessions = state.sessions().await?;
    let session = sessions.get(session_id).await?;
    ensure_host(&session, caller, "select the playback device")?;
    ensure_live(&session)?;

    sessions
        .update_fields(
            session_id,
            vec![
                (field(&["deviceId"])?, Value::from(request.device_id.clone())),
                (field(&["deviceName"])?, Value::from(request.device_name)),
            ],
        )
        .await?;

    info!(session_id, device_id = %request.device_id, "playback device selected");
    playback_monitor::spawn(state, session_id, &session.host_user_id);
    Ok(())
}

/// What the host's player is doing right now.
pub async fn playback_state(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
) -> Result<Option<PlaybackState>, ServiceError> {
    let session = state.sessions().await?.get(session_id).await?;
    ensure_participant(&session, caller)?;

    let link = user_service::provider_link(state, &session.host_user_id).await?;
    Ok(state.playback().playback_state(&link).await?)
}

/// Play the queue's next track on the session's device.
pub async fn advance_queue(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
) -> Result<AdvanceQueueResponse, ServiceError> {
    advance_with(state, session_id, caller, AdvanceMode::Play).await
}

/// Hand the next track to the player, then take it off the queue.
///
/// Nothing is written when the provider call fails. Advances of one session are serialized
/// through the session's gate.
pub async fn advance_with(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
    mode: AdvanceMode,
) -> Result<AdvanceQueueResponse, ServiceError> {
    let sessions = state.sessions().await?;
    let session = sessions.get(session_id).await?;
    ensure_host(&session, caller, "advance the queue")?;
    ensure_live(&session)?;

    let gate = state.advance_gate(session_id);
    let _permit = gate.lock().await;
    // Re-read under the gate: a concurrent advance may have taken the head of the queue.
    let session = sessions.get(session_id).await?;
    ensure_live(&session)?;
    let Some(device_id) = session.device_id.as_deref() else {
        return Err(ServiceError::FailedPrecondition(
            "Select a playback device first.".into(),
        ));
    };

    let Some((item_id, item)) = select_next_track(&session.queue) else {
        return Ok(AdvanceQueueResponse {
            success: true,
            message: EMPTY_QUEUE_MESSAGE.into(),
            played_track: None,
        });
    };

    let link = user_service::provider_link(state, &session.host_user_id).await?;
    let playback = state.playback();
    let handed_over = match mode {
        AdvanceMode::Play => playback.play(&link, device_id, &item.track.uri).await,
        AdvanceMode::EnqueueNext => playback.enqueue_next(&link, device_id, &item.track.uri).await,
    };
    if let Err(err) = handed_over {
        warn!(session_id, item_id = %item_id, error = %err, ?mode, "provider rejected the next track");
        return Err(err.into());
    }

    let track = serde_json::to_value(&item.track)
        .map_err(|err| ServiceError::Internal(format!("failed to encode track: {err}")))?;
    let mut changes = vec![(field(&["queue", item_id.as_str()])?, Value::Null)];
    match mode {
        AdvanceMode::Play => {
            changes.push((field(&["currentTrack"])?, track));
            changes.push((field(&["nextTrack"])?, Value::Null));
        }
        AdvanceMode::EnqueueNext => changes.push((field(&["nextTrack"])?, track)),
    }
    sessions.update_fields(session_id, changes).await?;

    info!(session_id, item_id = %item_id, uri = %item.track.uri, ?mode, "queue advanced");
    Ok(AdvanceQueueResponse {
        success: true,
        message: match mode {
            AdvanceMode::Play => format!("Now playing {} by {}.", item.track.name, item.track.artist),
            AdvanceMode::EnqueueNext => format!("Up next: {} by {}.", item.track.name, item.track.artist),
        },
        played_track: Some(item.track.clone().into()),
    })
}

/// Move the handed-over track to `currentTrack` once the player reports it.
///
/// Returns whether the session was updated.
pub async fn promote_next_track(
    state: &SharedState,
    session_id: &str,
    session: &Session,
    playing_uri: Option<&str>,
) -> Result<bool, ServiceError> {
    let Some(next) = session.next_track.as_ref() else {
        return Ok(false);
    };
    if playing_uri != Some(next.uri.as_str()) {
        return Ok(false);
    }

    let current = serde_json::to_value(next)
        .map_err(|err| ServiceError::Internal(format!("failed to encode track: {err}")))?;
    state
        .sessions()
        .await?
        .update_fields(
            session_id,
            vec![
                (field(&["currentTrack"])?, current),
                (field(&["nextTrack"])?, Value::Null),
            ],
        )
        .await?;
    debug!(session_id, uri = %next.uri, "handed-over track started playing");
    Ok(true)
}

/// Mark the session ended, then remove it once clients had time to notice.
pub async fn end_session(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
) -> Result<(), ServiceError> {
    let sessions = state.sessions().await?;
    let session = sessions.get(session_id).await?;
    ensure_host(&session, caller, "end the session")?;

    sessions
        .update_fields(session_id, vec![(field(&["isEnded"])?, Value::Bool(true))])
        .await?;
    schedule_removal(sessions, session_id, state.config().removal_delay);
    state.release_session(session_id);
    info!(session_id, "session ended");

    state
        .users()
        .await?
        .set_hosting(&caller.user_id, HostingSlot::Session, None)
        .await?;
    Ok(())
}

fn schedule_removal(sessions: SessionRepository, session_id: &str, delay: Duration) {
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match sessions.remove(&session_id).await {
            Ok(()) => debug!(session_id = %session_id, "ended session removed"),
            Err(err) => warn!(session_id = %session_id, error = %err, "failed to remove ended session"),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        playback::{CatalogTrack, simulated::PlaybackCommand},
        services::testing::{self, TestContext},
    };

    use super::*;

    fn track(uri: &str) -> TrackInput {
        TrackInput {
            uri: uri.into(),
            name: format!("Song {uri}"),
            artist: "Artist".into(),
            album: None,
            album_cover_url: None,
            isrc: None,
            duration_ms: None,
        }
    }

    async fn session_with_guest(ctx: &TestContext) -> String {
        let id = create_session(&ctx.state, &ctx.host).await.unwrap().session_id;
        join_session(&ctx.state, &id, &ctx.guest).await.unwrap();
        id
    }

    #[tokio::test]
    async fn hosting_requires_a_linked_account() {
        let ctx = testing::context().await;
        let stranger = Caller::new("stranger");
        assert!(matches!(
            create_session(&ctx.state, &stranger).await,
            Err(ServiceError::FailedPrecondition(_))
        ));
    }

    #[tokio::test]
    async fn host_rejoins_live_session() {
        let ctx = testing::context().await;
        let first = create_session(&ctx.state, &ctx.host).await.unwrap();
        let second = create_session(&ctx.state, &ctx.host).await.unwrap();
        assert_eq!(first.session_id, second.session_id);

        end_session(&ctx.state, &first.session_id, &ctx.host).await.unwrap();
        let third = create_session(&ctx.state, &ctx.host).await.unwrap();
        assert_ne!(first.session_id, third.session_id);
    }

    #[tokio::test]
    async fn join_is_idempotent_and_rejected_once_ended() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        join_session(&ctx.state, &id, &ctx.guest).await.unwrap();

        let view = get_session(&ctx.state, &id, &ctx.guest).await.unwrap();
        assert_eq!(view.participants.len(), 2);

        end_session(&ctx.state, &id, &ctx.host).await.unwrap();
        let late = Caller::new("late");
        assert!(matches!(
            join_session(&ctx.state, &id, &late).await,
            Err(ServiceError::FailedPrecondition(_))
        ));
    }

    #[tokio::test]
    async fn enqueue_checks_input_before_membership() {
        let ctx = testing::context().await;
        let id = create_session(&ctx.state, &ctx.host).await.unwrap().session_id;
        let outsider = Caller::new("outsider");

        let mut blank = track("t1");
        blank.artist = "  ".into();
        assert!(matches!(
            enqueue_track(&ctx.state, &id, &outsider, blank).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            enqueue_track(&ctx.state, &id, &outsider, track("t1")).await,
            Err(ServiceError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn enqueued_item_carries_suggester_and_zero_votes() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        let item = enqueue_track(&ctx.state, &id, &ctx.guest, track("t1"))
            .await
            .unwrap()
            .queue_item_id;

        let view = get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        let entry = view.queue.iter().find(|entry| entry.id == item).unwrap();
        assert_eq!(entry.suggester_username, "Guest");
        assert_eq!(entry.vote_count, 0);
        assert!(entry.votes.is_empty());
    }

    #[tokio::test]
    async fn vote_toggles_and_count_follows() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        let item = enqueue_track(&ctx.state, &id, &ctx.guest, track("t1"))
            .await
            .unwrap()
            .queue_item_id;

        let first = vote_for_track(&ctx.state, &id, &item, &ctx.guest).await.unwrap();
        assert_eq!((first.voted, first.vote_count), (true, 1));
        let host_vote = vote_for_track(&ctx.state, &id, &item, &ctx.host).await.unwrap();
        assert_eq!(host_vote.vote_count, 2);
        let undo = vote_for_track(&ctx.state, &id, &item, &ctx.guest).await.unwrap();
        assert_eq!((undo.voted, undo.vote_count), (false, 1));

        let view = get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert_eq!(view.queue[0].votes, vec!["host".to_string()]);
        assert_eq!(view.queue[0].vote_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_votes_settle_to_the_voter_set() {
        let ctx = testing::context().await;
        let id = create_session(&ctx.state, &ctx.host).await.unwrap().session_id;
        let item = enqueue_track(&ctx.state, &id, &ctx.host, track("t1"))
            .await
            .unwrap()
            .queue_item_id;

        let voters: Vec<Caller> = (0..12).map(|n| Caller::new(format!("voter{n}"))).collect();
        for voter in &voters {
            join_session(&ctx.state, &id, voter).await.unwrap();
        }

        let tasks: Vec<_> = voters
            .into_iter()
            .map(|voter| {
                let state = ctx.state.clone();
                let id = id.clone();
                let item = item.clone();
                tokio::spawn(async move { vote_for_track(&state, &id, &item, &voter).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // One more toggle pair settles the denormalised count.
        vote_for_track(&ctx.state, &id, &item, &ctx.host).await.unwrap();
        let settled = vote_for_track(&ctx.state, &id, &item, &ctx.host).await.unwrap();
        assert_eq!(settled.vote_count, 12);

        let view = get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert_eq!(view.queue[0].votes.len(), 12);
        assert_eq!(view.queue[0].vote_count, 12);
    }

    #[tokio::test]
    async fn vote_on_missing_item_is_not_found() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        assert!(matches!(
            vote_for_track(&ctx.state, &id, "nope", &ctx.guest).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn vote_conflicts_surface_as_internal() {
        let ctx = testing::context_with_store(Arc::new(testing::ContendedStore::default())).await;
        let id = session_with_guest(&ctx).await;
        let item = enqueue_track(&ctx.state, &id, &ctx.guest, track("t1"))
            .await
            .unwrap()
            .queue_item_id;

        match vote_for_track(&ctx.state, &id, &item, &ctx.guest).await {
            Err(ServiceError::Internal(message)) => {
                assert_eq!(message, "Failed to update vote due to conflicting data.")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn advance_needs_host_and_device() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        enqueue_track(&ctx.state, &id, &ctx.guest, track("t1")).await.unwrap();

        assert!(matches!(
            advance_queue(&ctx.state, &id, &ctx.guest).await,
            Err(ServiceError::PermissionDenied(_))
        ));
        assert!(matches!(
            advance_queue(&ctx.state, &id, &ctx.host).await,
            Err(ServiceError::FailedPrecondition(_))
        ));
    }

    #[tokio::test]
    async fn advance_plays_most_voted_then_reports_empty() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        testing::set_device(&ctx, &id).await;

        enqueue_track(&ctx.state, &id, &ctx.guest, track("early")).await.unwrap();
        let popular = enqueue_track(&ctx.state, &id, &ctx.guest, track("popular"))
            .await
            .unwrap()
            .queue_item_id;
        vote_for_track(&ctx.state, &id, &popular, &ctx.guest).await.unwrap();

        let played = advance_queue(&ctx.state, &id, &ctx.host).await.unwrap();
        assert_eq!(played.played_track.unwrap().uri, "popular");
        let played = advance_queue(&ctx.state, &id, &ctx.host).await.unwrap();
        assert_eq!(played.played_track.unwrap().uri, "early");

        let empty = advance_queue(&ctx.state, &id, &ctx.host).await.unwrap();
        assert!(empty.success);
        assert_eq!(empty.message, EMPTY_QUEUE_MESSAGE);
        assert_eq!(empty.played_track, None);

        let view = get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert!(view.queue.is_empty());
        assert_eq!(view.current_track.unwrap().uri, "early");
        assert_eq!(
            ctx.playback.commands("host"),
            vec![
                PlaybackCommand::Play {
                    device_id: testing::DEVICE.into(),
                    uri: "popular".into()
                },
                PlaybackCommand::Play {
                    device_id: testing::DEVICE.into(),
                    uri: "early".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn provider_failure_leaves_queue_untouched() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        testing::set_device(&ctx, &id).await;
        enqueue_track(&ctx.state, &id, &ctx.guest, track("t1")).await.unwrap();

        ctx.playback.set_failing(true);
        assert!(matches!(
            advance_queue(&ctx.state, &id, &ctx.host).await,
            Err(ServiceError::Internal(_))
        ));

        let view = get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert_eq!(view.queue.len(), 1);
        assert!(view.current_track.is_none());
    }

    #[tokio::test]
    async fn handing_over_keeps_the_current_track() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        testing::set_device(&ctx, &id).await;
        enqueue_track(&ctx.state, &id, &ctx.guest, track("first")).await.unwrap();
        enqueue_track(&ctx.state, &id, &ctx.guest, track("second")).await.unwrap();

        advance_queue(&ctx.state, &id, &ctx.host).await.unwrap();
        let handed = advance_with(&ctx.state, &id, &ctx.host, AdvanceMode::EnqueueNext)
            .await
            .unwrap();
        assert_eq!(handed.played_track.unwrap().uri, "second");

        let view = get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert!(view.queue.is_empty());
        assert_eq!(view.current_track.unwrap().uri, "first");
        assert_eq!(view.next_track.unwrap().uri, "second");

        // The player reporting the handed-over track promotes it.
        let session = ctx.state.sessions().await.unwrap().get(&id).await.unwrap();
        assert!(!promote_next_track(&ctx.state, &id, &session, Some("first")).await.unwrap());
        assert!(promote_next_track(&ctx.state, &id, &session, Some("second")).await.unwrap());
        let view = get_session(&ctx.state, &id, &ctx.host).await.unwrap();
        assert_eq!(view.current_track.unwrap().uri, "second");
        assert!(view.next_track.is_none());
    }

    #[tokio::test]
    async fn search_is_for_participants_with_a_real_query() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        for n in 0..8 {
            ctx.playback.add_to_catalog(CatalogTrack {
                uri: format!("spotify:track:{n}"),
                name: format!("Night Drive {n}"),
                artist: "Neon".into(),
                album: Some("Skyline".into()),
                album_cover_url: None,
                isrc: None,
                duration_ms: Some(180_000),
            });
        }

        assert!(matches!(
            search_tracks(&ctx.state, &id, &ctx.guest, "   ").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            search_tracks(&ctx.state, &id, &Caller::new("stranger"), "night").await,
            Err(ServiceError::PermissionDenied(_))
        ));

        let found = search_tracks(&ctx.state, &id, &ctx.guest, " night drive ").await.unwrap();
        assert_eq!(found.results.len(), SEARCH_RESULT_LIMIT);
        assert_eq!(found.results[0].uri, "spotify:track:0");
        assert_eq!(found.results[0].album.as_deref(), Some("Skyline"));

        ctx.playback.set_failing(true);
        assert!(matches!(
            search_tracks(&ctx.state, &id, &ctx.guest, "night").await,
            Err(ServiceError::Internal(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ended_session_is_removed_even_when_host_cleanup_fails() {
        let store = testing::ContendedStore::uncontended().with_failing_removals("users");
        let ctx = testing::context_with_store(Arc::new(store)).await;
        let id = session_with_guest(&ctx).await;

        assert!(end_session(&ctx.state, &id, &ctx.host).await.is_err());
        assert!(get_session(&ctx.state, &id, &ctx.guest).await.unwrap().is_ended);

        tokio::time::sleep(ctx.state.config().removal_delay + Duration::from_secs(1)).await;
        assert!(matches!(
            get_session(&ctx.state, &id, &ctx.guest).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn only_the_host_ends_the_session() {
        let ctx = testing::context().await;
        let id = session_with_guest(&ctx).await;
        assert!(matches!(
            end_session(&ctx.state, &id, &ctx.guest).await,
            Err(ServiceError::PermissionDenied(_))
        ));

        end_session(&ctx.state, &id, &ctx.host).await.unwrap();
        let view = get_session(&ctx.state, &id, &ctx.guest).await.unwrap();
        assert!(view.is_ended);
        assert!(matches!(
            enqueue_track(&ctx.state, &id, &ctx.guest, track("t1")).await,
            Err(ServiceError::FailedPrecondition(_))
        ));
    }
}
