#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use duet_session::{
    Identity, SessionClient, SessionConfig,
    transport::{
        ConnectTarget, InboundFrame, Transport, TransportConnection, TransportError,
        TransportEvent, TransportSink,
    },
};
use duet_stomp::NegotiatedHeartBeat;
use serde_json::Value;
use tokio::sync::mpsc;

/// Long enough for an open and the post-connect settle delay to complete.
pub const SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Subscribe { id: String, destination: String },
    Unsubscribe { id: String },
    Publish { destination: String, body: String },
    Close,
}

#[derive(Debug, Default)]
pub struct MockSink {
    calls: Mutex<Vec<SinkCall>>,
    closed: AtomicBool,
}

impl MockSink {
    fn record(&self, call: SinkCall) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Id of the most recent subscription to `destination`.
    pub fn subscription_id(&self, destination: &str) -> Option<String> {
        self.calls().into_iter().rev().find_map(|call| match call {
            SinkCall::Subscribe {
                id,
                destination: subscribed,
            } if subscribed == destination => Some(id),
            _ => None,
        })
    }

    pub fn subscribed_destinations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Subscribe { destination, .. } => Some(destination),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Publish { destination, body } => {
                    Some((destination, serde_json::from_str(&body).unwrap()))
                }
                _ => None,
            })
            .collect()
    }
}

impl TransportSink for MockSink {
    fn subscribe(&self, id: &str, destination: &str) -> Result<(), TransportError> {
        self.record(SinkCall::Subscribe {
            id: id.to_string(),
            destination: destination.to_string(),
        })
    }

    fn unsubscribe(&self, id: &str) -> Result<(), TransportError> {
        self.record(SinkCall::Unsubscribe { id: id.to_string() })
    }

    fn publish(&self, destination: &str, body: &str) -> Result<(), TransportError> {
        self.record(SinkCall::Publish {
            destination: destination.to_string(),
            body: body.to_string(),
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.calls.lock().unwrap().push(SinkCall::Close);
        }
    }
}

/// One connection handed out by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockConnection {
    pub sink: Arc<MockSink>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl MockConnection {
    pub async fn send(&self, event: TransportEvent) {
        self.events.send(event).await.unwrap();
    }

    /// Delivers `body` on whatever subscription currently targets `destination`.
    pub async fn deliver(&self, destination: &str, body: &str) {
        let subscription = self
            .sink
            .subscription_id(destination)
            .unwrap_or_else(|| panic!("no subscription for {destination}"));

        self.send(TransportEvent::Message(InboundFrame {
            subscription: Some(subscription),
            destination: Some(destination.to_string()),
            body: body.to_string(),
        }))
        .await;
    }

    pub async fn close(&self, reason: Option<&str>) {
        self.send(TransportEvent::Closed(reason.map(str::to_string)))
            .await;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Opens and immediately reports `CONNECTED`.
    #[default]
    Accept,
    /// Opens the socket but never reports `CONNECTED`.
    Silent,
    Refuse,
    Unauthorized,
}

#[derive(Debug, Default)]
pub struct MockTransport {
    opens: AtomicUsize,
    behavior: Mutex<OpenBehavior>,
    connections: Mutex<Vec<MockConnection>>,
}

impl MockTransport {
    pub fn new(behavior: OpenBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            ..Self::default()
        })
    }

    pub fn set_behavior(&self, behavior: OpenBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn latest(&self) -> MockConnection {
        self.connections
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection was opened")
    }

    pub fn connections(&self) -> Vec<MockConnection> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _target: &ConnectTarget) -> Result<TransportConnection, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            OpenBehavior::Accept | OpenBehavior::Silent => {}
            OpenBehavior::Refuse => {
                return Err(TransportError::Connect("connection refused".to_string()));
            }
            OpenBehavior::Unauthorized => return Err(TransportError::Unauthorized),
        }

        let sink = Arc::new(MockSink::default());
        let (events_tx, events_rx) = mpsc::channel(32);
        if behavior == OpenBehavior::Accept {
            events_tx
                .try_send(TransportEvent::Connected {
                    heart_beat: NegotiatedHeartBeat::default(),
                })
                .unwrap();
        }

        self.connections.lock().unwrap().push(MockConnection {
            sink: sink.clone(),
            events: events_tx,
        });

        Ok(TransportConnection {
            sink,
            events: events_rx,
        })
    }
}

pub fn client(transport: &Arc<MockTransport>) -> SessionClient {
    SessionClient::with_transport(Identity::from(7), SessionConfig::default(), transport.clone())
        .unwrap()
}

/// Connects and waits until standing subscriptions are in place.
pub async fn connected_client(transport: &Arc<MockTransport>) -> (SessionClient, MockConnection) {
    let client = client(transport);
    client.connect();
    tokio::time::sleep(SETTLE).await;

    let connection = transport.latest();
    (client, connection)
}

/// Collects whatever a listener is handed.
#[derive(Debug)]
pub struct Recorded<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Recorded<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for Recorded<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(vec![])))
    }
}

impl<T: Clone> Recorded<T> {
    pub fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
