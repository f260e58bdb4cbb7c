//! The seam between the session actor and the wire.
//!
//! A [`Transport`] opens one STOMP session and hands back a
//! [`TransportConnection`]: a queue-only [`TransportSink`] for outbound frames
//! and a stream of [`TransportEvent`]s. The session actor never touches a
//! socket directly, which lets tests script a connection in memory.

use std::sync::Arc;

use async_trait::async_trait;
use duet_stomp::{Frame, HeartBeat, NegotiatedHeartBeat, StompError, headers};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::{
    config::{ConfigError, SessionConfig},
    identity::Identity,
};

pub mod ws;

pub use ws::StompWsTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    Connect(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Connection closed")]
    Closed,
    #[error("No CONNECTED frame within {0:?}")]
    HandshakeTimeout(std::time::Duration),
    #[error("Connection lost: {0}")]
    Connection(String),
    #[error("Failed to send: {0}")]
    Send(String),
    #[error(transparent)]
    Stomp(#[from] StompError),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Everything a transport needs to open a session for one identity.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    /// Endpoint with the identity query parameter appended.
    pub url: Url,
    pub identity: Identity,
    /// Header name that carries [`Self::identity`] on every frame.
    pub identity_header: String,
    pub heart_beat: HeartBeat,
}

impl ConnectTarget {
    /// # Errors
    ///
    /// * If the configured endpoint is not a valid `ws`/`wss` URL
    pub fn new(config: &SessionConfig, identity: &Identity) -> Result<Self, ConfigError> {
        let mut url = config.endpoint()?;
        url.query_pairs_mut()
            .append_pair(&config.identity_param, identity.as_str());

        Ok(Self {
            url,
            identity: identity.clone(),
            identity_header: config.identity_param.clone(),
            heart_beat: HeartBeat::symmetric(config.heartbeat),
        })
    }

    /// Adds the identity header to an outbound frame.
    #[must_use]
    pub fn stamp(&self, frame: Frame) -> Frame {
        frame.with_header(self.identity_header.as_str(), self.identity.as_str())
    }

    /// The `CONNECT` frame opening the STOMP session.
    #[must_use]
    pub fn connect_frame(&self) -> Frame {
        let host = self.url.host_str().unwrap_or("localhost");

        self.stamp(Frame::connect(host, self.heart_beat))
    }
}

/// A `MESSAGE` frame as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Subscription id the server delivered this frame for.
    pub subscription: Option<String>,
    pub destination: Option<String>,
    pub body: String,
}

impl From<Frame> for InboundFrame {
    fn from(frame: Frame) -> Self {
        Self {
            subscription: frame.header(headers::SUBSCRIPTION).map(str::to_string),
            destination: frame.header(headers::DESTINATION).map(str::to_string),
            body: frame.body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server answered `CONNECT` with `CONNECTED`.
    Connected { heart_beat: NegotiatedHeartBeat },
    Message(InboundFrame),
    /// The server sent an `ERROR` frame.
    Error(String),
    /// The connection ended. `None` for a clean close.
    Closed(Option<String>),
}

/// Outbound half of an open connection.
///
/// Calls only queue frames; they never wait on the network. Every frame is
/// stamped with the identity header.
pub trait TransportSink: Send + Sync {
    /// # Errors
    ///
    /// * If the connection is already closed
    fn subscribe(&self, id: &str, destination: &str) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// * If the connection is already closed
    fn unsubscribe(&self, id: &str) -> Result<(), TransportError>;

    /// # Errors
    ///
    /// * If the connection is already closed
    fn publish(&self, destination: &str, body: &str) -> Result<(), TransportError>;

    /// Sends `DISCONNECT` and closes the socket once queued frames are written.
    fn close(&self);
}

impl std::fmt::Debug for dyn TransportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{TransportSink}}")
    }
}

pub struct TransportConnection {
    pub sink: Arc<dyn TransportSink>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the socket and sends `CONNECT`. Completion of the STOMP
    /// handshake is reported later as [`TransportEvent::Connected`].
    ///
    /// # Errors
    ///
    /// * [`TransportError::Unauthorized`] if the server rejects the identity
    /// * [`TransportError::Connect`] if the socket cannot be opened
    async fn open(&self, target: &ConnectTarget) -> Result<TransportConnection, TransportError>;
}
