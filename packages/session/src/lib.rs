#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Client side of a Duet realtime session.
//!
//! A [`SessionClient`] keeps one STOMP-over-WebSocket connection alive for a
//! user: it reconnects with exponential backoff, re-establishes the standing
//! subscriptions (personal queue, matching results, system status) and the
//! current chat room after every reconnect, classifies inbound frames into
//! [`Envelope`](models::Envelope)s and [`ChatMessage`](models::ChatMessage)s,
//! and publishes outbound commands.
//!
//! ```rust,no_run
//! # use duet_session::{Identity, SessionClient, SessionConfig};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SessionClient::new(Identity::from(7), SessionConfig::from_env()?)?;
//!
//! client.on_chat_message(|message| println!("{}: {}", message.room_id, message.content));
//! client.on_error(|error| eprintln!("session error: {error}"));
//! client.connect();
//! client.subscribe_to_chat_room("room-42");
//!
//! client
//!     .send_chat_message("room-42", "hello", None, Some("mina".to_string()))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod backoff;
pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod identity;
pub mod listeners;
pub mod matching;
pub mod registry;
pub mod room;
pub mod transport;

pub use client::{SessionClient, SessionSnapshot};
pub use config::{ConfigError, Destinations, SessionConfig};
pub use duet_session_models as models;
pub use identity::{Identity, IdentityError, IdentityProvider};
pub use listeners::ListenerId;
pub use room::{RoomIdentifier, normalize_room_id};
pub use transport::{Transport, TransportError};

/// Reported to error listeners.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server sent a STOMP `ERROR` frame.
    #[error("Server error: {message}")]
    Server { message: String },
    /// Automatic reconnects stopped; only an explicit connect retries.
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("Unauthorized")]
    Unauthorized,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error("Session client has shut down")]
    ClientClosed,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
