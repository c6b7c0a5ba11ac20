use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, watch,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dto::sse::{Handshake, ServerEvent, SystemStatus},
    error::ServiceError,
    services::{event_service, match_service},
    state::SharedState,
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Subscribe to a live match, returning the receiver plus the handshake describing its state.
///
/// The subscription is taken while the match is held so no notification falls
/// between the handshake and the stream.
pub async fn subscribe(
    state: &SharedState,
    match_id: Uuid,
) -> Result<(broadcast::Receiver<ServerEvent>, Option<ServerEvent>), ServiceError> {
    let handle = match_service::live_match(state, match_id)?;

    let engine = handle.engine().lock().await;
    let receiver = handle.events().subscribe();
    debug!(
        %match_id,
        subscribers = handle.events().subscriber_count(),
        "match SSE subscriber added"
    );
    let handshake = event_service::named_event(
        EVENT_HANDSHAKE,
        &Handshake {
            match_id,
            status: engine.phase(),
            version: engine.version(),
            degraded: state.is_degraded(),
        },
    );
    Ok((receiver, handshake))
}

/// Convert a broadcast receiver into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
///
/// Changes of degraded mode are interleaved as `system.status` events.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    mut degraded: watch::Receiver<bool>,
    handshake: Option<ServerEvent>,
    match_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(handshake) = handshake {
            if tx.send(Ok(to_event(handshake))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(%match_id, skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
                changed = degraded.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = SystemStatus {
                        degraded: *degraded.borrow_and_update(),
                    };
                    if let Some(event) = event_service::named_event(EVENT_SYSTEM_STATUS, &status) {
                        if tx.send(Ok(to_event(event))).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(%match_id, "match SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}
