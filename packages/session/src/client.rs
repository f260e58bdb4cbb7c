//! The session client and the task that owns its state.
//!
//! [`SessionClient`] is a cheap handle. Every call becomes a `Request`
//! processed in order by one `SessionActor` task, which owns the transport,
//! the registry and the retry counters. Listeners are shared with the task
//! and change at call time. Timers are spawned
//! sleeps that post an `Internal` message back, tagged with the generation
//! they were started in so a stale timer is ignored.

use std::{sync::Arc, time::Duration};

use duet_session_models::{ChatMessage, ConnectionState, Envelope, SubscriptionEntry};
use duet_stomp::NegotiatedHeartBeat;
use serde_json::Value;
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::{
    BuildError, CommandError, SessionError,
    backoff::RetryCounter,
    commands::{self, ChatRequest, OutboundCommand},
    config::{ConfigError, SessionConfig},
    dispatch::{DispatchedEvent, dispatch},
    identity::{Identity, IdentityProvider},
    listeners::{Listener, ListenerId, Listeners},
    registry::SubscriptionRegistry,
    room::RoomIdentifier,
    transport::{
        ConnectTarget, InboundFrame, StompWsTransport, Transport, TransportConnection,
        TransportError, TransportEvent, TransportSink,
    },
};

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub entries: Vec<SubscriptionEntry>,
    /// Reconnect attempts made in the current disconnect episode.
    pub reconnect_attempt: u32,
    /// Delay of the reconnect currently waiting to run.
    pub pending_reconnect: Option<Duration>,
    /// The room that is (re-)established whenever the session connects.
    pub room: Option<RoomIdentifier>,
    /// Room subscribe retries made while disconnected.
    pub room_retry_attempt: u32,
    /// Delay of the room retry currently waiting to run.
    pub pending_room_retry: Option<Duration>,
}

#[derive(Debug)]
enum Request {
    Connect,
    Disconnect,
    SubscribeRoom(String),
    LeaveRoom,
    SendChat {
        request: ChatRequest,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    RequestMatching(u64),
    ShareMusic {
        room_id: String,
        music: Value,
    },
    Ping,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Internal {
    Opened {
        generation: u64,
        result: Result<TransportConnection, TransportError>,
    },
    Settled {
        generation: u64,
    },
    HandshakeTimeout {
        generation: u64,
    },
    ReconnectDue {
        generation: u64,
    },
    RoomRetryDue {
        generation: u64,
    },
}

enum Step {
    Transport(Option<TransportEvent>),
    Internal(Internal),
    Request(Option<Request>),
}

/// Handle to one realtime session.
///
/// Clones share the session. The session stops on [`SessionClient::shutdown`]
/// or once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionClient {
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<ConnectionState>,
    listeners: Listeners,
}

impl SessionClient {
    /// Creates a client using the STOMP-over-WebSocket transport.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// * If the configured endpoint is invalid
    pub fn new(identity: Identity, config: SessionConfig) -> Result<Self, ConfigError> {
        Self::with_transport(identity, config, Arc::new(StompWsTransport::default()))
    }

    /// Resolves the identity once, then creates the client.
    ///
    /// # Errors
    ///
    /// * If the identity cannot be resolved
    /// * If the configured endpoint is invalid
    pub async fn from_provider(
        provider: &dyn IdentityProvider,
        config: SessionConfig,
    ) -> Result<Self, BuildError> {
        let identity = provider.resolve_identity().await?;

        Ok(Self::new(identity, config)?)
    }

    /// Creates a client over a custom transport.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// * If the configured endpoint is invalid
    pub fn with_transport(
        identity: Identity,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let target = ConnectTarget::new(&config, &identity)?;
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let listeners = Listeners::default();

        let actor = SessionActor {
            config,
            target,
            transport,
            state: state_tx,
            requests: requests_rx,
            internal_tx,
            internal_rx,
            sink: None,
            events: None,
            registry: SubscriptionRegistry::default(),
            listeners: listeners.clone(),
            reconnect: RetryCounter::default(),
            pending_reconnect: None,
            generation: 0,
            episode: CancellationToken::new(),
            room: None,
            room_retry: RetryCounter::default(),
            pending_room_retry: None,
            room_generation: 0,
            room_timers: CancellationToken::new(),
        };

        tokio::spawn(actor.run());

        Ok(Self {
            requests: requests_tx,
            status: state_rx,
            listeners,
        })
    }

    fn request(&self, request: Request) {
        if let Err(e) = self.requests.send(request) {
            log::warn!("Session has shut down; dropping {:?}", e.0);
        }
    }

    /// Opens the connection. No-op while connecting or connected.
    pub fn connect(&self) {
        self.request(Request::Connect);
    }

    /// Closes the connection and cancels every pending retry.
    pub fn disconnect(&self) {
        self.request(Request::Disconnect);
    }

    #[must_use]
    pub fn connection_status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Joins a room, replacing the current one. The room is re-joined after
    /// every reconnect until [`Self::leave_chat_room`].
    pub fn subscribe_to_chat_room(&self, room_id: impl Into<String>) {
        self.request(Request::SubscribeRoom(room_id.into()));
    }

    pub fn leave_chat_room(&self) {
        self.request(Request::LeaveRoom);
    }

    /// Publishes a chat message. `sender_id` defaults to the session identity.
    ///
    /// Resolves once the frame is queued on the connection; there is no
    /// server acknowledgement.
    ///
    /// # Errors
    ///
    /// * [`CommandError::NotConnected`] if the session is not connected
    /// * [`CommandError::Transport`] if the frame cannot be queued
    /// * [`CommandError::ClientClosed`] if the session has shut down
    pub async fn send_chat_message(
        &self,
        room_id: impl Into<String>,
        content: impl Into<String>,
        sender_id: Option<String>,
        sender_name: Option<String>,
    ) -> Result<(), CommandError> {
        let (reply, settled) = oneshot::channel();

        self.requests
            .send(Request::SendChat {
                request: ChatRequest {
                    room_id: room_id.into(),
                    content: content.into(),
                    sender_id,
                    sender_name,
                },
                reply,
            })
            .map_err(|_| CommandError::ClientClosed)?;

        settled.await.map_err(|_| CommandError::ClientClosed)?
    }

    pub fn request_matching(&self, user_id: u64) {
        self.request(Request::RequestMatching(user_id));
    }

    pub fn share_music(&self, room_id: impl Into<String>, music: Value) {
        self.request(Request::ShareMusic {
            room_id: room_id.into(),
            music,
        });
    }

    pub fn ping(&self) {
        self.request(Request::Ping);
    }

    /// Called once standing subscriptions are in place after each connect.
    ///
    /// Listeners registered here see every event processed after this call
    /// returns.
    pub fn on_connect(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.listeners.add(Listener::Connect(Arc::new(listener)))
    }

    pub fn on_disconnect(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.listeners.add(Listener::Disconnect(Arc::new(listener)))
    }

    pub fn on_error(
        &self,
        listener: impl Fn(&SessionError) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(Listener::Error(Arc::new(listener)))
    }

    pub fn on_message(&self, listener: impl Fn(&Envelope) + Send + Sync + 'static) -> ListenerId {
        self.listeners.add(Listener::Message(Arc::new(listener)))
    }

    pub fn on_chat_message(
        &self,
        listener: impl Fn(&ChatMessage) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(Listener::Chat(Arc::new(listener)))
    }

    /// Stops notifying `id`. Takes effect before this returns.
    pub fn remove_listener(&self, id: ListenerId) {
        if !self.listeners.remove(id) {
            log::debug!("remove_listener: {id} is not registered");
        }
    }

    /// # Errors
    ///
    /// * [`CommandError::ClientClosed`] if the session has shut down
    pub async fn snapshot(&self) -> Result<SessionSnapshot, CommandError> {
        let (reply, snapshot) = oneshot::channel();

        self.requests
            .send(Request::Snapshot(reply))
            .map_err(|_| CommandError::ClientClosed)?;

        snapshot.await.map_err(|_| CommandError::ClientClosed)
    }

    /// Disconnects and stops the session. Later calls on any handle are no-ops.
    pub async fn shutdown(&self) {
        let (reply, stopped) = oneshot::channel();

        if self.requests.send(Request::Shutdown(reply)).is_ok() && stopped.await.is_err() {
            log::debug!("shutdown: Session stopped before replying");
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn next_event(events: Option<&mut mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

struct SessionActor {
    config: SessionConfig,
    target: ConnectTarget,
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    requests: mpsc::UnboundedReceiver<Request>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    sink: Option<Arc<dyn TransportSink>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    registry: SubscriptionRegistry,
    listeners: Listeners,
    reconnect: RetryCounter,
    pending_reconnect: Option<Duration>,
    /// Bumped whenever the connection is torn down.
    generation: u64,
    /// Cancels the open, settle and reconnect timers of the current generation.
    episode: CancellationToken,
    room: Option<RoomIdentifier>,
    room_retry: RetryCounter,
    pending_room_retry: Option<Duration>,
    room_generation: u64,
    room_timers: CancellationToken,
}

impl SessionActor {
    async fn run(mut self) {
        log::debug!("run: Session started for identity {}", self.target.identity);

        loop {
            #[allow(clippy::redundant_pub_crate)]
            let step = select! {
                biased;
                event = next_event(self.events.as_mut()) => Step::Transport(event),
                Some(internal) = self.internal_rx.recv() => Step::Internal(internal),
                request = self.requests.recv() => Step::Request(request),
            };

            match step {
                Step::Transport(event) => self.on_transport_event(event),
                Step::Internal(internal) => self.on_internal(internal),
                Step::Request(Some(request)) => {
                    if !self.on_request(request) {
                        break;
                    }
                }
                Step::Request(None) => {
                    log::debug!("run: Every handle was dropped");
                    self.disconnect();
                    break;
                }
            }
        }

        log::debug!("run: Session stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            log::debug!("set_state: {current} -> {state}");
            *current = state;
            true
        });
    }

    fn connected_sink(&self) -> Option<Arc<dyn TransportSink>> {
        if self.state() == ConnectionState::Connected {
            self.sink.clone()
        } else {
            None
        }
    }

    #[allow(clippy::redundant_pub_crate)]
    fn schedule(&self, token: &CancellationToken, delay: Duration, message: Internal) {
        let token = token.clone();
        let internal_tx = self.internal_tx.clone();

        tokio::spawn(async move {
            select! {
                () = token.cancelled() => {}
                () = sleep(delay) => {
                    if internal_tx.send(message).is_err() {
                        log::trace!("schedule: Session stopped before timer fired");
                    }
                }
            }
        });
    }

    /// Returns `false` when the session should stop.
    fn on_request(&mut self, request: Request) -> bool {
        match request {
            Request::Connect => self.connect(),
            Request::Disconnect => self.disconnect(),
            Request::SubscribeRoom(room_id) => self.subscribe_room(room_id),
            Request::LeaveRoom => self.leave_room(),
            Request::SendChat { request, reply } => {
                if reply.send(self.send_chat(request)).is_err() {
                    log::debug!("send_chat: Caller stopped waiting");
                }
            }
            Request::RequestMatching(user_id) => {
                self.fire("request_matching", |actor| {
                    commands::matching_request(&actor.config.destinations, user_id)
                });
            }
            Request::ShareMusic { room_id, music } => self.fire("share_music", |actor| {
                commands::share_music(
                    &actor.config.destinations,
                    &room_id,
                    music,
                    actor.target.identity.as_str(),
                    now_millis(),
                )
            }),
            Request::Ping => self.fire("ping", |actor| {
                commands::ping(
                    &actor.config.destinations,
                    actor.target.identity.as_str(),
                    now_millis(),
                )
            }),
            Request::Snapshot(reply) => {
                if reply.send(self.snapshot()).is_err() {
                    log::debug!("snapshot: Caller stopped waiting");
                }
            }
            Request::Shutdown(reply) => {
                self.disconnect();
                if reply.send(()).is_err() {
                    log::debug!("shutdown: Caller stopped waiting");
                }
                return false;
            }
        }

        true
    }

    fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Opened { generation, result } if generation == self.generation => {
                self.on_opened(result);
            }
            Internal::Opened {
                result: Ok(connection),
                ..
            } => {
                log::debug!("on_internal: Closing connection opened after cancel");
                connection.sink.close();
            }
            Internal::Settled { generation } if generation == self.generation => {
                self.on_settled();
            }
            Internal::HandshakeTimeout { generation }
                if generation == self.generation
                    && self.state() == ConnectionState::Connecting =>
            {
                let timeout = self.config.connect_timeout;
                log::warn!("on_internal: No CONNECTED within {timeout:?}");
                self.connection_lost(Some(SessionError::Transport(
                    TransportError::HandshakeTimeout(timeout),
                )));
            }
            Internal::ReconnectDue { generation } if generation == self.generation => {
                self.pending_reconnect = None;
                self.open();
            }
            Internal::RoomRetryDue { generation } if generation == self.room_generation => {
                self.pending_room_retry = None;
                self.retry_room();
            }
            stale => log::trace!("on_internal: Ignoring stale {stale:?}"),
        }
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Connected { heart_beat }) => self.on_connected(heart_beat),
            Some(TransportEvent::Message(frame)) => self.on_message(frame),
            Some(TransportEvent::Error(message)) => {
                self.connection_lost(Some(SessionError::Server { message }));
            }
            Some(TransportEvent::Closed(reason)) => {
                self.connection_lost(
                    reason.map(|reason| SessionError::Transport(TransportError::Connection(reason))),
                );
            }
            None => self.connection_lost(Some(SessionError::Transport(TransportError::Closed))),
        }
    }

    fn connect(&mut self) {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            log::debug!("connect: Already {state}");
            return;
        }

        self.teardown();
        self.reconnect.reset();
        self.open();
    }

    #[allow(clippy::redundant_pub_crate)]
    fn open(&mut self) {
        self.set_state(ConnectionState::Connecting);

        let transport = self.transport.clone();
        let target = self.target.clone();
        let token = self.episode.clone();
        let internal_tx = self.internal_tx.clone();
        let generation = self.generation;

        log::debug!("open: Connecting to {}", target.url);

        self.schedule(
            &self.episode,
            self.config.connect_timeout,
            Internal::HandshakeTimeout { generation },
        );

        tokio::spawn(async move {
            select! {
                () = token.cancelled() => log::debug!("open: Cancelled"),
                result = transport.open(&target) => {
                    if internal_tx.send(Internal::Opened { generation, result }).is_err() {
                        log::trace!("open: Session stopped while connecting");
                    }
                }
            }
        });
    }

    fn on_opened(&mut self, result: Result<TransportConnection, TransportError>) {
        match result {
            Ok(connection) => {
                log::debug!("on_opened: Socket open, waiting for CONNECTED");
                self.sink = Some(connection.sink);
                self.events = Some(connection.events);
            }
            Err(TransportError::Unauthorized) => {
                log::error!("on_opened: Server rejected the identity; not retrying");
                self.teardown();
                self.set_state(ConnectionState::Disconnected);
                self.listeners.notify_error(&SessionError::Unauthorized);
            }
            Err(e) => self.connection_lost(Some(SessionError::Transport(e))),
        }
    }

    fn on_connected(&mut self, heart_beat: NegotiatedHeartBeat) {
        let state = self.state();
        if state != ConnectionState::Connecting {
            log::warn!("on_connected: Unexpected CONNECTED while {state}");
            return;
        }

        if self.reconnect.attempts() > 0 {
            log::info!(
                "Reconnected after {} attempt(s)",
                self.reconnect.attempts()
            );
        } else {
            log::info!("Connected");
        }
        log::debug!("on_connected: heart_beat={heart_beat:?}");

        self.reconnect.reset();
        self.pending_reconnect = None;
        self.set_state(ConnectionState::Connected);

        self.schedule(
            &self.episode,
            self.config.settle_delay,
            Internal::Settled {
                generation: self.generation,
            },
        );
    }

    fn on_settled(&mut self) {
        let Some(sink) = self.connected_sink() else {
            return;
        };

        if let Err(e) = self
            .registry
            .ensure_standing(&sink, &self.config.destinations)
        {
            log::error!("on_settled: Failed to subscribe standing topics: {e}");
        }
        if let Some(room) = self.room.clone() {
            self.cancel_room_retry();
            self.subscribe_room_now(&sink, &room);
        }

        self.listeners.notify_connect();
    }

    fn on_message(&self, frame: InboundFrame) {
        let Some(key) = frame
            .subscription
            .as_deref()
            .and_then(|id| self.registry.key_for(id))
        else {
            log::debug!(
                "on_message: Dropping frame for unknown subscription {:?}",
                frame.subscription
            );
            return;
        };

        match dispatch(key, &frame.body, now_millis()) {
            Some(DispatchedEvent::Message(envelope)) => self.listeners.notify_message(&envelope),
            Some(DispatchedEvent::Chat(message)) => self.listeners.notify_chat(&message),
            None => {}
        }
    }

    /// Drops the connection, releases subscriptions and cancels the timers of
    /// the current generation.
    fn teardown(&mut self) {
        self.registry.clear();
        if let Some(sink) = self.sink.take() {
            sink.close();
        }
        self.events = None;
        self.pending_reconnect = None;
        self.generation += 1;
        self.episode.cancel();
        self.episode = CancellationToken::new();
    }

    fn connection_lost(&mut self, error: Option<SessionError>) {
        let state = self.state();
        log::warn!("connection_lost: state={state} error={error:?}");

        self.teardown();
        self.set_state(ConnectionState::Disconnected);

        if let Some(error) = &error {
            self.listeners.notify_error(error);
        }
        if state == ConnectionState::Connected {
            self.listeners.notify_disconnect();
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let Some(retry) = self.reconnect.schedule_next(&self.config.reconnect) else {
            let attempts = self.reconnect.attempts();
            log::error!("Giving up reconnecting after {attempts} attempt(s)");
            self.listeners
                .notify_error(&SessionError::ReconnectExhausted { attempts });
            return;
        };

        log::info!(
            "Reconnecting in {:?} (attempt {}/{})",
            retry.delay,
            retry.attempt,
            self.config.reconnect.max_attempts
        );
        self.pending_reconnect = Some(retry.delay);
        self.schedule(
            &self.episode,
            retry.delay,
            Internal::ReconnectDue {
                generation: self.generation,
            },
        );
    }

    fn disconnect(&mut self) {
        let state = self.state();

        self.teardown();
        self.cancel_room_retry();
        self.reconnect.reset();
        self.set_state(ConnectionState::Disconnected);

        if state != ConnectionState::Disconnected {
            log::info!("Disconnected");
            self.listeners.notify_disconnect();
        }
    }

    fn subscribe_room(&mut self, room_id: String) {
        let room = RoomIdentifier::new(room_id);
        log::debug!("subscribe_room: {room} (normalized {})", room.normalized);

        self.cancel_room_retry();
        self.room = Some(room);
        self.retry_room();
    }

    fn retry_room(&mut self) {
        let Some(room) = self.room.clone() else {
            return;
        };

        if let Some(sink) = self.connected_sink() {
            self.room_retry.reset();
            self.subscribe_room_now(&sink, &room);
            return;
        }

        match self.room_retry.schedule_next(&self.config.room_retry) {
            Some(retry) => {
                log::debug!(
                    "retry_room: Not connected; retrying {room} in {:?} (attempt {})",
                    retry.delay,
                    retry.attempt
                );
                self.pending_room_retry = Some(retry.delay);
                self.schedule(
                    &self.room_timers,
                    retry.delay,
                    Internal::RoomRetryDue {
                        generation: self.room_generation,
                    },
                );
            }
            None => log::error!(
                "Failed to subscribe to room {room} after {} attempt(s); it will be joined on the next connect",
                self.room_retry.attempts()
            ),
        }
    }

    fn subscribe_room_now(&mut self, sink: &Arc<dyn TransportSink>, room: &RoomIdentifier) {
        match self
            .registry
            .subscribe_room(sink, &self.config.destinations, room)
        {
            Ok(()) => log::info!("Joined room {room}"),
            Err(e) => log::error!("Failed to subscribe to room {room}: {e}"),
        }
    }

    fn leave_room(&mut self) {
        self.cancel_room_retry();
        if let Some(room) = self.room.take() {
            log::info!("Leaving room {room}");
        }
        self.registry.release_room();
    }

    fn cancel_room_retry(&mut self) {
        self.room_generation += 1;
        self.room_timers.cancel();
        self.room_timers = CancellationToken::new();
        self.room_retry.reset();
        self.pending_room_retry = None;
    }

    fn send_chat(&self, request: ChatRequest) -> Result<(), CommandError> {
        let Some(sink) = self.connected_sink() else {
            log::warn!("send_chat: Not connected");
            return Err(CommandError::NotConnected);
        };

        let command = commands::chat_message(
            &self.config.destinations,
            request,
            self.target.identity.as_str(),
            now_millis(),
        )?;
        sink.publish(&command.destination, &command.body)?;
        log::debug!("send_chat: Published to {}", command.destination);

        Ok(())
    }

    /// Publishes a command that nobody waits on.
    fn fire(
        &self,
        what: &str,
        build: impl FnOnce(&Self) -> Result<OutboundCommand, serde_json::Error>,
    ) {
        let Some(sink) = self.connected_sink() else {
            log::warn!("{what}: Not connected; dropping");
            return;
        };

        let command = match build(self) {
            Ok(command) => command,
            Err(e) => {
                log::error!("{what}: Failed to serialize: {e}");
                return;
            }
        };

        match sink.publish(&command.destination, &command.body) {
            Ok(()) => log::debug!("{what}: Published to {}", command.destination),
            Err(e) => log::error!("{what}: Failed to publish: {e}"),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            entries: self.registry.entries(),
            reconnect_attempt: self.reconnect.attempts(),
            pending_reconnect: self.pending_reconnect,
            room: self.room.clone(),
            room_retry_attempt: self.room_retry.attempts(),
            pending_room_retry: self.pending_room_retry,
        }
    }
}
