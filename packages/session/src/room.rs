//! Room identifiers.
//!
//! Producers publish to a room under either the token the user picked
//! (`"room-42"`) or its digits (`"42"`), so both forms are tracked.

use serde::{Deserialize, Serialize};

/// Extracts the ASCII digits of `room_id`, or returns it unchanged if it has none.
#[must_use]
pub fn normalize_room_id(room_id: &str) -> String {
    let digits = room_id
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();

    if digits.is_empty() {
        room_id.to_string()
    } else {
        digits
    }
}

/// A room token and its normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomIdentifier {
    pub raw: String,
    pub normalized: String,
}

impl RoomIdentifier {
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        let raw = room_id.into();
        let normalized = normalize_room_id(&raw);

        Self { raw, normalized }
    }

    /// Whether normalization changed the token, i.e. a second topic is needed.
    #[must_use]
    pub fn needs_normalized_topic(&self) -> bool {
        self.raw != self.normalized
    }
}

impl std::fmt::Display for RoomIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
