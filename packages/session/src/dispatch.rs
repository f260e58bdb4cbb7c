//! Inbound message classification.

use duet_session_models::{ChatMessage, Envelope, EventType, TopicKey};
use serde_json::Value;

use crate::matching::correlate;

/// What a listener sees for one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchedEvent {
    Message(Envelope),
    Chat(ChatMessage),
}

/// Classifies the body of a frame received on `key`.
///
/// Returns `None` for frames that are dropped: unparseable bodies, matching
/// results that are waiting or indeterminate, and malformed chat messages.
#[must_use]
pub fn dispatch(key: TopicKey, body: &str, received_at: i64) -> Option<DispatchedEvent> {
    let payload = match serde_json::from_str::<Value>(body) {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("dispatch: Dropping unparseable {key} frame: {e}");
            return None;
        }
    };

    match key {
        TopicKey::Personal => Some(envelope(EventType::Notification, payload, received_at)),
        TopicKey::System => Some(envelope(EventType::SystemStatus, payload, received_at)),
        TopicKey::Matching => {
            let outcome = correlate(&payload)?;
            let Some(event_type) = outcome.event_type() else {
                log::debug!("dispatch: Matching still {outcome:?}");
                return None;
            };

            Some(DispatchedEvent::Message(Envelope {
                event_type,
                data: payload,
                timestamp: received_at,
                outcome: Some(outcome),
            }))
        }
        TopicKey::Chat | TopicKey::ChatNormalized => {
            match serde_json::from_value::<ChatMessage>(payload) {
                Ok(message) => Some(DispatchedEvent::Chat(message)),
                Err(e) => {
                    log::warn!("dispatch: Dropping malformed chat message on {key}: {e}");
                    None
                }
            }
        }
    }
}

/// Wraps a payload, preferring the payload's own string `type` field.
fn envelope(default_type: EventType, payload: Value, received_at: i64) -> DispatchedEvent {
    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .map_or(default_type, named_event_type);

    DispatchedEvent::Message(Envelope {
        event_type,
        data: payload,
        timestamp: received_at,
        outcome: None,
    })
}

fn named_event_type(name: &str) -> EventType {
    serde_json::from_value(Value::String(name.to_string()))
        .unwrap_or_else(|_| EventType::Other(name.to_string()))
}
