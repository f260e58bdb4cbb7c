#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Data types exchanged between the Duet realtime session and its callers.
//!
//! Inbound types are lenient about numeric vs. string identifiers since the
//! server does not use one representation consistently.

use serde::{Deserialize, Deserializer, Serialize};
use serde_aux::prelude::deserialize_string_from_number;
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};

/// Connectivity of a session client.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Logical name of a subscription slot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TopicKey {
    /// Notifications addressed to the current user.
    Personal,
    /// Matchmaking results for the current user.
    Matching,
    /// Broadcast system status.
    System,
    /// The active room, under the token the caller used.
    Chat,
    /// The active room, under its digits-only form.
    ChatNormalized,
}

impl TopicKey {
    /// Topics that stay subscribed for the whole connected session.
    pub const STANDING: [Self; 3] = [Self::Personal, Self::Matching, Self::System];

    #[must_use]
    pub const fn is_room(self) -> bool {
        matches!(self, Self::Chat | Self::ChatNormalized)
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A live subscription as reported by a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEntry {
    pub topic_key: TopicKey,
    pub topic_address: String,
    pub active: bool,
}

/// Classification attached to an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Notification,
    SystemStatus,
    MatchingSuccess,
    MatchingFailed,
    /// A type named by the payload itself.
    #[serde(untagged)]
    Other(String),
}

/// Normalized result of a matchmaking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchingOutcome {
    Waiting,
    Matched,
    AlreadyMatched,
    Failed,
}

impl MatchingOutcome {
    /// The envelope type emitted for this outcome, if any.
    ///
    /// `Waiting` is an expected intermediate state and is never emitted.
    #[must_use]
    pub const fn event_type(self) -> Option<EventType> {
        match self {
            Self::Waiting => None,
            Self::Matched | Self::AlreadyMatched => Some(EventType::MatchingSuccess),
            Self::Failed => Some(EventType::MatchingFailed),
        }
    }
}

/// A classified inbound event for generic message listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Value,
    /// Receive time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Set for matchmaking envelopes so `AlreadyMatched` stays distinguishable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchingOutcome>,
}

/// A chat message received on a room topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(deserialize_with = "deserialize_string_from_number")]
    pub room_id: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    /// Server-side send time in whatever representation the server used.
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// Kind of an outbound chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatMessageType {
    #[default]
    Text,
}

/// Body published for a chat send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub content: String,
    pub message_type: ChatMessageType,
    pub timestamp: i64,
}

/// Body published for a matchmaking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingRequestPayload {
    pub user_id: u64,
}

/// Body published when sharing a music item into a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMusicPayload {
    pub room_id: String,
    pub sender_id: String,
    pub music: Value,
    pub timestamp: i64,
}

/// Body published by an application-level ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    pub user_id: String,
    pub timestamp: i64,
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(id)) => Some(id),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}
