//! STOMP over a tokio-tungstenite WebSocket.
//!
//! Each open connection gets one pump task that owns the socket: a writer
//! forwarding the outbound queue, a reader feeding the [`FrameDecoder`] with
//! an inbound liveness deadline, and a pinger sending heart-beats at the
//! negotiated rate.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use duet_stomp::{Command, Decoded, Frame, FrameDecoder, HeartBeat, headers};
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::{
    Stream, StreamExt as _,
    future::{self, Either},
    pin_mut,
};
use tokio::{
    net::TcpStream,
    select,
    sync::{mpsc, oneshot},
    time::{Instant, sleep, sleep_until},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error, Message, http::StatusCode},
};
use tokio_util::sync::CancellationToken;

use super::{
    ConnectTarget, InboundFrame, Transport, TransportConnection, TransportError, TransportEvent,
    TransportSink,
};

/// Negotiated heart-beat intervals the server may miss before the
/// connection is treated as dead.
const LIVENESS_GRACE_FACTOR: u32 = 2;
const DEFAULT_EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Heartbeat,
    Close,
}

impl Outbound {
    fn into_message(self) -> Message {
        match self {
            Self::Frame(frame) => {
                duet_logging::debug_or_trace!(
                    ("Sending {} frame", frame.command),
                    ("Sending frame {frame:?}")
                );
                Message::Text(frame.encode().into())
            }
            Self::Heartbeat => {
                log::trace!("Sending heart-beat");
                Message::Text(String::from("\n").into())
            }
            Self::Close => Message::Close(None),
        }
    }
}

struct StompWsSink {
    sender: UnboundedSender<Outbound>,
    target: ConnectTarget,
}

impl StompWsSink {
    fn enqueue(&self, frame: Frame) -> Result<(), TransportError> {
        self.sender
            .unbounded_send(Outbound::Frame(self.target.stamp(frame)))
            .map_err(|e| {
                if e.is_disconnected() {
                    TransportError::Closed
                } else {
                    TransportError::Send(e.to_string())
                }
            })
    }
}

impl TransportSink for StompWsSink {
    fn subscribe(&self, id: &str, destination: &str) -> Result<(), TransportError> {
        self.enqueue(Frame::subscribe(id, destination))
    }

    fn unsubscribe(&self, id: &str) -> Result<(), TransportError> {
        self.enqueue(Frame::unsubscribe(id))
    }

    fn publish(&self, destination: &str, body: &str) -> Result<(), TransportError> {
        self.enqueue(Frame::send(destination, body))
    }

    fn close(&self) {
        if self.enqueue(Frame::disconnect()).is_ok()
            && let Err(e) = self.sender.unbounded_send(Outbound::Close)
        {
            log::debug!("close: Failed to queue close: {e:?}");
        }
        self.sender.close_channel();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StompWsTransport {
    event_buffer: usize,
}

impl Default for StompWsTransport {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl StompWsTransport {
    /// `event_buffer` bounds how many inbound events may wait for the session.
    #[must_use]
    pub const fn new(event_buffer: usize) -> Self {
        Self { event_buffer }
    }
}

#[async_trait]
impl Transport for StompWsTransport {
    async fn open(&self, target: &ConnectTarget) -> Result<TransportConnection, TransportError> {
        log::debug!("Connecting to websocket '{}'...", target.url);
        let (ws_stream, _) = connect_async(target.url.as_str())
            .await
            .map_err(connect_error)?;
        log::debug!("WebSocket handshake has been successfully completed");

        let (txf, rxf) = futures_channel::mpsc::unbounded();
        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);

        txf.unbounded_send(Outbound::Frame(target.connect_frame()))
            .map_err(|e| TransportError::Send(e.to_string()))?;

        let sink = StompWsSink {
            sender: txf.clone(),
            target: target.clone(),
        };

        tokio::spawn(pump(ws_stream, txf, rxf, events_tx, target.heart_beat));

        Ok(TransportConnection {
            sink: Arc::new(sink),
            events: events_rx,
        })
    }
}

fn connect_error(err: Error) -> TransportError {
    log::error!("Websocket error: {err:?}");
    if let Error::Http(response) = &err {
        if response.status() == StatusCode::UNAUTHORIZED {
            log::error!("Unauthorized ws connection");
            return TransportError::Unauthorized;
        }

        let body = response
            .body()
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        log::error!("error ({}): {body}", response.status());

        return TransportError::Connect(format!("HTTP {}", response.status()));
    }

    TransportError::Connect(err.to_string())
}

async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    txf: UnboundedSender<Outbound>,
    rxf: UnboundedReceiver<Outbound>,
    events: mpsc::Sender<TransportEvent>,
    heart_beat: HeartBeat,
) {
    let close_token = CancellationToken::new();
    let (interval_tx, interval_rx) = oneshot::channel();
    let (write, read) = ws_stream.split();

    let pinger = tokio::spawn(ping(txf, interval_rx, close_token.clone()));

    let ws_writer = rxf.map(|outbound| Ok(outbound.into_message())).forward(write);
    let ws_reader = read_frames(read, &events, heart_beat, interval_tx);

    pin_mut!(ws_writer, ws_reader);
    match future::select(ws_writer, ws_reader).await {
        Either::Left((Ok(()), _)) => log::debug!("pump: Outbound queue closed"),
        Either::Left((Err(e), _)) => {
            log::error!("Send Loop error: {e:?}");
            emit(&events, TransportEvent::Closed(Some(e.to_string()))).await;
        }
        Either::Right(((), _)) => log::debug!("pump: Reader finished"),
    }

    close_token.cancel();
    log::debug!("pump: Waiting for pinger to finish...");
    if let Err(e) = pinger.await {
        log::warn!("pump: Pinger failed to finish: {e:?}");
    }
    log::info!("WebSocket connection closed");
}

/// Returns `false` once nobody is listening anymore.
async fn emit(events: &mpsc::Sender<TransportEvent>, event: TransportEvent) -> bool {
    if events.send(event).await.is_err() {
        log::debug!("emit: Session dropped the connection");
        return false;
    }
    true
}

/// What the read loop does after a decoded frame.
enum Flow {
    Continue,
    /// The session is gone or the server ended it; no `Closed` follows.
    Stop,
}

/// Per-connection state of the read loop.
struct FrameReader<'a> {
    events: &'a mpsc::Sender<TransportEvent>,
    heart_beat: HeartBeat,
    interval_tx: Option<oneshot::Sender<Duration>>,
    /// Silence longer than this closes the connection.
    liveness: Option<Duration>,
    deadline: Instant,
}

impl FrameReader<'_> {
    fn touch(&mut self) {
        if let Some(window) = self.liveness {
            self.deadline = Instant::now() + window;
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Flow {
        let delivered = match frame.command {
            Command::Connected => self.on_connected(&frame).await,
            Command::Message => {
                duet_logging::debug_or_trace!(
                    ("Received message on {:?}", frame.header(headers::DESTINATION)),
                    ("Received message {frame:?}")
                );
                emit(self.events, TransportEvent::Message(InboundFrame::from(frame))).await
            }
            Command::Error => {
                let message = frame
                    .header(headers::MESSAGE)
                    .map_or_else(|| frame.body.clone(), str::to_string);
                log::error!("Server error: {message}");
                emit(self.events, TransportEvent::Error(message)).await;
                false
            }
            Command::Receipt => {
                log::trace!("Received receipt {:?}", frame.header(headers::RECEIPT_ID));
                true
            }
            command => {
                log::warn!("Ignoring unexpected {command} frame");
                true
            }
        };

        if delivered { Flow::Continue } else { Flow::Stop }
    }

    async fn on_connected(&mut self, frame: &Frame) -> bool {
        let server = frame
            .header(headers::HEART_BEAT)
            .map(str::parse::<HeartBeat>)
            .transpose()
            .unwrap_or_else(|e| {
                log::warn!("Ignoring server heart-beat header: {e}");
                None
            })
            .unwrap_or(HeartBeat::NONE);
        let negotiated = self.heart_beat.negotiate(server);

        if let (Some(every), Some(tx)) = (negotiated.send_every, self.interval_tx.take())
            && tx.send(every).is_err()
        {
            log::debug!("Pinger already stopped");
        }
        self.liveness = negotiated
            .expect_every
            .map(|every| every.saturating_mul(LIVENESS_GRACE_FACTOR));
        self.touch();

        log::debug!("STOMP session established heart_beat={negotiated:?}");
        emit(self.events, TransportEvent::Connected { heart_beat: negotiated }).await
    }
}

async fn read_frames<R>(
    mut read: R,
    events: &mpsc::Sender<TransportEvent>,
    heart_beat: HeartBeat,
    interval_tx: oneshot::Sender<Duration>,
) where
    R: Stream<Item = Result<Message, Error>> + Unpin,
{
    let mut decoder = FrameDecoder::default();
    let mut reader = FrameReader {
        events,
        heart_beat,
        interval_tx: Some(interval_tx),
        liveness: None,
        deadline: Instant::now(),
    };

    let reason = 'read: loop {
        let liveness = reader.liveness;

        #[allow(clippy::redundant_pub_crate)]
        let message = select! {
            message = read.next() => message,
            () = sleep_until(reader.deadline), if liveness.is_some() => {
                log::warn!("No data from server within {liveness:?}");
                break 'read Some("heart-beat timeout".to_string());
            }
        };

        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                log::error!("Receive Loop error: {e:?}");
                break 'read Some(e.to_string());
            }
            None => break 'read None,
        };

        reader.touch();

        match message {
            Message::Text(text) => decoder.push(text.as_bytes()),
            Message::Binary(bytes) => decoder.push(&bytes),
            Message::Close(frame) => {
                log::debug!("Server closed the socket: {frame:?}");
                break 'read frame
                    .map(|frame| frame.reason.as_str().to_string())
                    .filter(|reason| !reason.is_empty());
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }

        loop {
            match decoder.next_item() {
                Ok(None) => break,
                Ok(Some(Decoded::Heartbeat)) => log::trace!("Received heart-beat"),
                Ok(Some(Decoded::Frame(frame))) => {
                    if matches!(reader.on_frame(frame).await, Flow::Stop) {
                        return;
                    }
                }
                Err(e) => {
                    log::error!("Failed to decode frame: {e}");
                    break 'read Some(e.to_string());
                }
            }
        }
    };

    emit(events, TransportEvent::Closed(reason)).await;
}

#[allow(clippy::redundant_pub_crate)]
async fn ping(
    txf: UnboundedSender<Outbound>,
    interval: oneshot::Receiver<Duration>,
    close_token: CancellationToken,
) {
    let every = select! {
        () = close_token.cancelled() => return,
        every = interval => match every {
            Ok(every) => every,
            Err(_) => return,
        },
    };

    log::debug!("ping: Sending heart-beats every {every:?}");

    loop {
        select! {
            () = close_token.cancelled() => break,
            () = sleep(every) => {
                if let Err(e) = txf.unbounded_send(Outbound::Heartbeat) {
                    log::debug!("ping: Outbound queue closed: {e:?}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use duet_stomp::NegotiatedHeartBeat;
    use futures_util::stream;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::SessionConfig, identity::Identity};

    fn target() -> ConnectTarget {
        ConnectTarget::new(&SessionConfig::default(), &Identity::from(7)).unwrap()
    }

    fn sink() -> (StompWsSink, UnboundedReceiver<Outbound>) {
        let (sender, rx) = futures_channel::mpsc::unbounded();

        (
            StompWsSink {
                sender,
                target: target(),
            },
            rx,
        )
    }

    fn next_frame(rx: &mut UnboundedReceiver<Outbound>) -> Frame {
        match rx.try_next().unwrap().unwrap() {
            Outbound::Frame(frame) => frame,
            other => panic!("Expected frame, got {other:?}"),
        }
    }

    fn text(frame: &Frame) -> Result<Message, Error> {
        Ok(Message::Text(frame.encode().into()))
    }

    fn connected(heart_beat: &str) -> Frame {
        Frame::new(Command::Connected)
            .with_header("version", "1.2")
            .with_header("heart-beat", heart_beat)
    }

    async fn collect(
        messages: Vec<Result<Message, Error>>,
        heart_beat: HeartBeat,
    ) -> (Vec<TransportEvent>, oneshot::Receiver<Duration>) {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (interval_tx, interval_rx) = oneshot::channel();

        read_frames(stream::iter(messages), &events_tx, heart_beat, interval_tx).await;
        drop(events_tx);

        let mut events = vec![];
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }

        (events, interval_rx)
    }

    #[test_log::test]
    fn sink_stamps_identity_on_every_frame() {
        let (sink, mut rx) = sink();

        sink.subscribe("sub-0", "/topic/system-status").unwrap();
        sink.publish("/app/ping", "{}").unwrap();
        sink.unsubscribe("sub-0").unwrap();

        for _ in 0..3 {
            assert_eq!(next_frame(&mut rx).header("userId"), Some("7"));
        }
    }

    #[test_log::test]
    fn sink_close_sends_disconnect_then_closes_queue() {
        let (sink, mut rx) = sink();

        sink.close();

        assert_eq!(next_frame(&mut rx).command, Command::Disconnect);
        assert!(matches!(rx.try_next(), Ok(Some(Outbound::Close))));
        assert!(matches!(rx.try_next(), Ok(None)));
        assert!(matches!(
            sink.publish("/app/ping", "{}"),
            Err(TransportError::Closed)
        ));
    }

    #[test_log::test]
    fn heartbeat_is_a_bare_newline() {
        assert_eq!(
            Outbound::Heartbeat.into_message(),
            Message::Text(String::from("\n").into())
        );
    }

    #[test_log::test(tokio::test)]
    async fn reader_reports_connected_messages_and_close() {
        let message = Frame::new(Command::Message)
            .with_header("subscription", "sub-1")
            .with_header("destination", "/topic/system-status")
            .with_body(r#"{"status":"UP"}"#);
        let heart_beat = HeartBeat::symmetric(Duration::from_secs(10));

        let (events, interval_rx) = collect(
            vec![
                text(&connected("5000,20000")),
                Ok(Message::Text(String::from("\n").into())),
                text(&message),
            ],
            heart_beat,
        )
        .await;

        assert_eq!(
            events,
            vec![
                TransportEvent::Connected {
                    heart_beat: NegotiatedHeartBeat {
                        send_every: Some(Duration::from_secs(20)),
                        expect_every: Some(Duration::from_secs(10)),
                    },
                },
                TransportEvent::Message(InboundFrame {
                    subscription: Some("sub-1".to_string()),
                    destination: Some("/topic/system-status".to_string()),
                    body: r#"{"status":"UP"}"#.to_string(),
                }),
                TransportEvent::Closed(None),
            ]
        );
        assert_eq!(interval_rx.await.unwrap(), Duration::from_secs(20));
    }

    #[test_log::test(tokio::test)]
    async fn reader_reports_error_frame_without_close() {
        let error = Frame::new(Command::Error)
            .with_header("message", "Invalid destination")
            .with_body("details");

        let (events, _) = collect(vec![text(&error)], HeartBeat::NONE).await;

        assert_eq!(
            events,
            vec![TransportEvent::Error("Invalid destination".to_string())]
        );
    }

    #[test_log::test(tokio::test)]
    async fn reader_treats_undecodable_data_as_failure() {
        let (events, _) = collect(
            vec![Ok(Message::Text(String::from("BOGUS\n\n\0").into()))],
            HeartBeat::NONE,
        )
        .await;

        assert!(matches!(events.as_slice(), [TransportEvent::Closed(Some(_))]));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn silent_server_trips_liveness_deadline() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (interval_tx, _interval_rx) = oneshot::channel();
        let read = stream::iter(vec![text(&connected("10000,10000"))]).chain(stream::pending());
        let started = Instant::now();

        read_frames(
            read,
            &events_tx,
            HeartBeat::symmetric(Duration::from_secs(10)),
            interval_tx,
        )
        .await;

        assert!(matches!(
            events_rx.recv().await,
            Some(TransportEvent::Connected { .. })
        ));
        assert_eq!(
            events_rx.recv().await,
            Some(TransportEvent::Closed(Some("heart-beat timeout".to_string())))
        );
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn pinger_sends_heart_beats_until_cancelled() {
        let (txf, mut rxf) = futures_channel::mpsc::unbounded();
        let (interval_tx, interval_rx) = oneshot::channel();
        let close_token = CancellationToken::new();
        let pinger = tokio::spawn(ping(txf, interval_rx, close_token.clone()));

        interval_tx.send(Duration::from_secs(10)).unwrap();
        sleep(Duration::from_secs(25)).await;
        close_token.cancel();
        pinger.await.unwrap();

        let mut beats = 0;
        while let Ok(Some(outbound)) = rxf.try_next() {
            assert!(matches!(outbound, Outbound::Heartbeat));
            beats += 1;
        }
        assert_eq!(beats, 2);
    }
}
