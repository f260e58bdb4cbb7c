//! Outbound command payloads and their destinations.

use duet_session_models::{
    ChatMessagePayload, ChatMessageType, MatchingRequestPayload, PingPayload, ShareMusicPayload,
};
use serde::Serialize;
use serde_json::Value;

use crate::config::Destinations;

/// A serialized command ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub destination: String,
    pub body: String,
}

impl OutboundCommand {
    fn new(destination: String, payload: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            destination,
            body: serde_json::to_string(payload)?,
        })
    }
}

/// A chat message as requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub room_id: String,
    pub content: String,
    /// Defaults to the session identity.
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
}

/// # Errors
///
/// * If the payload fails to serialize
pub fn chat_message(
    destinations: &Destinations,
    request: ChatRequest,
    identity: &str,
    timestamp: i64,
) -> Result<OutboundCommand, serde_json::Error> {
    let destination = destinations.chat_send(&request.room_id);

    OutboundCommand::new(
        destination,
        &ChatMessagePayload {
            room_id: request.room_id,
            sender_id: request.sender_id.unwrap_or_else(|| identity.to_string()),
            sender_name: request.sender_name,
            content: request.content,
            message_type: ChatMessageType::Text,
            timestamp,
        },
    )
}

/// # Errors
///
/// * If the payload fails to serialize
pub fn matching_request(
    destinations: &Destinations,
    user_id: u64,
) -> Result<OutboundCommand, serde_json::Error> {
    OutboundCommand::new(
        destinations.matching_request.clone(),
        &MatchingRequestPayload { user_id },
    )
}

/// # Errors
///
/// * If the payload fails to serialize
pub fn share_music(
    destinations: &Destinations,
    room_id: &str,
    music: Value,
    identity: &str,
    timestamp: i64,
) -> Result<OutboundCommand, serde_json::Error> {
    OutboundCommand::new(
        destinations.share_music(room_id),
        &ShareMusicPayload {
            room_id: room_id.to_string(),
            sender_id: identity.to_string(),
            music,
            timestamp,
        },
    )
}

/// # Errors
///
/// * If the payload fails to serialize
pub fn ping(
    destinations: &Destinations,
    identity: &str,
    timestamp: i64,
) -> Result<OutboundCommand, serde_json::Error> {
    OutboundCommand::new(
        destinations.ping.clone(),
        &PingPayload {
            user_id: identity.to_string(),
            timestamp,
        },
    )
}
