use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        queue::SessionView,
        quiz::QuizStateView,
        server_time,
        sse::{Handshake, RecordRemoved, ServerEvent, SystemStatus},
        user::Caller,
    },
    error::ServiceError,
    services::{queue_service, quiz_service},
    state::SharedState,
};

/// Stream of events destined to one SSE client.
pub type EventStream = BoxStream<'static, ServerEvent>;

fn handshake(state: &SharedState, stream: &str, id: &str) -> Option<ServerEvent> {
    ServerEvent::json(
        Some("handshake".to_string()),
        &Handshake {
            stream: stream.to_string(),
            id: id.to_string(),
            degraded: state.is_degraded(),
            server_time: server_time(),
        },
    )
    .ok()
}

fn removed(id: &str) -> Option<ServerEvent> {
    ServerEvent::json(Some("removed".to_string()), &RecordRemoved { id: id.to_string() }).ok()
}

/// Snapshots of a session for one of its participants, until the session is removed.
pub async fn subscribe_session(
    state: &SharedState,
    session_id: &str,
    caller: &Caller,
) -> Result<EventStream, ServiceError> {
    queue_service::get_session(state, session_id, caller).await?;
    let mut snapshots = state.sessions().await?.subscribe(session_id)?;

    let first = handshake(state, "session", session_id);
    let id = session_id.to_string();
    let stream = async_stream::stream! {
        if let Some(event) = first {
            yield event;
        }
        while let Some(snapshot) = snapshots.next().await {
            match snapshot {
                Ok(Some(session)) => {
                    match ServerEvent::json(Some("session".to_string()), &SessionView::new(&id, session)) {
                        Ok(event) => yield event,
                        Err(err) => warn!(session_id = %id, error = %err, "failed to encode session snapshot"),
                    }
                }
                Ok(None) => {
                    if let Some(event) = removed(&id) {
                        yield event;
                    }
                    break;
                }
                Err(err) => {
                    warn!(session_id = %id, error = %err, "session subscription failed");
                    break;
                }
            }
        }
    };
    Ok(stream.boxed())
}

/// Snapshots of a quiz for one of its participants, until the quiz is removed.
pub async fn subscribe_quiz(
    state: &SharedState,
    quiz_id: &str,
    caller: &Caller,
) -> Result<EventStream, ServiceError> {
    quiz_service::get_quiz_state(state, quiz_id, caller).await?;
    let mut snapshots = state.quizzes().await?.subscribe(quiz_id)?;
    let users = state.users().await?;

    let first = handshake(state, "quiz", quiz_id);
    let id = quiz_id.to_string();
    let stream = async_stream::stream! {
        if let Some(event) = first {
            yield event;
        }
        while let Some(snapshot) = snapshots.next().await {
            match snapshot {
                Ok(Some(quiz)) => {
                    let usernames = match quiz_service::usernames(&users, &quiz).await {
                        Ok(usernames) => usernames,
                        Err(err) => {
                            warn!(quiz_id = %id, error = %err, "failed to load participant names");
                            Default::default()
                        }
                    };
                    match ServerEvent::json(Some("quiz".to_string()), &QuizStateView::new(&id, quiz, usernames)) {
                        Ok(event) => yield event,
                        Err(err) => warn!(quiz_id = %id, error = %err, "failed to encode quiz snapshot"),
                    }
                }
                Ok(None) => {
                    if let Some(event) = removed(&id) {
                        yield event;
                    }
                    break;
                }
                Err(err) => {
                    warn!(quiz_id = %id, error = %err, "quiz subscription failed");
                    break;
                }
            }
        }
    };
    Ok(stream.boxed())
}

/// Convert an event stream into an SSE response, forwarding events and degraded-mode
/// changes until the client disconnects.
pub fn to_sse_stream(
    state: &SharedState,
    mut events: EventStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let mut degraded = state.degraded_watcher();
    let stream_id = Uuid::new_v4();

    tokio::spawn(async move {
        info!(%stream_id, "SSE stream connected");
        loop {
            let payload = tokio::select! {
                _ = tx.closed() => break,
                next = events.next() => match next {
                    Some(payload) => payload,
                    None => break,
                },
                changed = degraded.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = SystemStatus { degraded: *degraded.borrow_and_update() };
                    match ServerEvent::json(Some("system_status".to_string()), &status) {
                        Ok(payload) => payload,
                        Err(_) => continue,
                    }
                }
            };

            let mut event = Event::default().data(payload.data);
            if let Some(name) = payload.event {
                event = event.event(name);
            }
            if tx.send(Ok(event)).await.is_err() {
                break;
            }
        }
        info!(%stream_id, "SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
