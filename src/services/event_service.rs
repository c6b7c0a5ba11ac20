use serde::Serialize;
use tracing::warn;

use crate::{dto::sse::ServerEvent, engine::notifications::MatchNotification, state::MatchHandle};

/// Push the notifications of one engine call onto the match's hub, in order.
pub fn publish(handle: &MatchHandle, notifications: &[MatchNotification]) {
    for notification in notifications {
        match ServerEvent::from_notification(notification) {
            Ok(event) => handle.events().broadcast(event),
            Err(err) => warn!(
                match_id = %handle.match_id(),
                event = notification.name(),
                error = %err,
                "failed to serialize match notification"
            ),
        }
    }
}

/// Build a named event for a single subscriber, logging serialization failures.
pub fn named_event(event: &str, payload: &impl Serialize) -> Option<ServerEvent> {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event, error = %err, "failed to serialize SSE payload");
            None
        }
    }
}
