//! STOMP over WebSocket transport.
//!
//! After the CONNECT/CONNECTED handshake the socket is split: a writer task
//! drains the connection's outbound queue and a reader task turns inbound
//! frames into `TransportEvent`s.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use crate::error::TransportError;

use super::{
    Connection, EventCallback, SubscriptionId, Transport, TransportEvent,
    frame::{Command, Frame},
};

/// Default broker endpoint (raw WebSocket path of the chat endpoint)
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws/chat/websocket";

const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// `Transport` speaking STOMP 1.2 over a WebSocket
#[derive(Debug, Clone)]
pub struct StompTransport {
    url: String,
    host: String,
}

impl StompTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let host = host_of(&url).unwrap_or("localhost").to_string();
        Self { url, host }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Host part of a ws:// or wss:// URL
fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?']).next()?;
    let host = match authority.strip_prefix('[') {
        // IPv6 literal
        Some(v6) => v6.split(']').next()?,
        None => authority.split(':').next()?,
    };
    (!host.is_empty()).then_some(host)
}

#[async_trait]
impl Transport for StompTransport {
    async fn connect(
        &self,
        on_event: EventCallback,
    ) -> Result<Box<dyn Connection>, TransportError> {
        tracing::debug!("Opening WebSocket to {}", self.url);
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let connect_frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", self.host.as_str())
            .header("heart-beat", "0,0");
        write
            .send(Message::Text(connect_frame.encode().into()))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tokio::time::timeout(
            Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            await_connected(&mut read),
        )
        .await
        .map_err(|_| TransportError::Connect("timed out waiting for CONNECTED".to_string()))??;

        tracing::info!("Connected to broker at {}", self.url);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(outbound_rx, write));
        let reader = tokio::spawn(reader_loop(read, on_event));

        Ok(Box::new(StompConnection {
            outbound: outbound_tx,
            next_subscription: 0,
            reader: Some(reader),
        }))
    }
}

/// Wait for the broker's CONNECTED frame
async fn await_connected(read: &mut WsReader) -> Result<(), TransportError> {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match Frame::decode(text.as_str()) {
                Ok(Some(frame)) if frame.command == Command::Connected => {
                    tracing::debug!(
                        "Broker accepted STOMP version {}",
                        frame.get_header("version").unwrap_or("?")
                    );
                    return Ok(());
                }
                Ok(Some(frame)) if frame.command == Command::Error => {
                    let reason = frame
                        .get_header("message")
                        .map(str::to_string)
                        .unwrap_or(frame.body);
                    return Err(TransportError::Rejected(reason));
                }
                Ok(Some(frame)) => {
                    tracing::debug!("Ignoring {} frame before CONNECTED", frame.command);
                }
                Ok(None) => {}
                Err(e) => return Err(TransportError::Protocol(e.to_string())),
            },
            Ok(Message::Close(_)) => return Err(TransportError::Closed),
            Ok(_) => {}
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        }
    }
    Err(TransportError::Closed)
}

/// Forward queued messages to the socket until the queue closes or a Close is sent
async fn writer_loop(mut rx: mpsc::UnboundedReceiver<Message>, mut write: WsWriter) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            tracing::warn!("WebSocket write error: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    write.close().await.ok();
}

/// Turn inbound frames into transport events
async fn reader_loop(mut read: WsReader, on_event: EventCallback) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match Frame::decode(text.as_str()) {
                Ok(Some(frame)) => dispatch_frame(frame, &on_event),
                Ok(None) => tracing::trace!("Heart-beat"),
                Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
            },
            Ok(Message::Close(_)) => {
                tracing::info!("Broker closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket read error: {}", e);
                on_event(TransportEvent::Error(e.to_string()));
                return;
            }
        }
    }
    on_event(TransportEvent::Closed);
}

fn dispatch_frame(frame: Frame, on_event: &EventCallback) {
    match frame.command {
        Command::Message => {
            let Some(subscription) = frame.get_header("subscription").and_then(SubscriptionId::parse)
            else {
                tracing::warn!("MESSAGE frame without a usable subscription header");
                return;
            };
            on_event(TransportEvent::Message {
                subscription,
                body: frame.body,
            });
        }
        Command::Error => {
            let reason = frame
                .get_header("message")
                .map(str::to_string)
                .unwrap_or(frame.body);
            tracing::warn!("Broker error: {}", reason);
            on_event(TransportEvent::Error(reason));
        }
        other => tracing::debug!("Ignoring {} frame", other),
    }
}

/// Client side of an established STOMP session
struct StompConnection {
    outbound: mpsc::UnboundedSender<Message>,
    next_subscription: u64,
    reader: Option<JoinHandle<()>>,
}

impl StompConnection {
    fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.reader.is_none() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Message::Text(frame.encode().into()))
            .map_err(|_| TransportError::Closed)
    }
}

impl Connection for StompConnection {
    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, TransportError> {
        let id = SubscriptionId::new(self.next_subscription);
        self.send_frame(
            Frame::new(Command::Subscribe)
                .header("id", id.to_string())
                .header("destination", topic)
                .header("ack", "auto"),
        )?;
        self.next_subscription += 1;
        tracing::debug!("Subscribed to {} as {}", topic, id);
        Ok(id)
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) -> Result<(), TransportError> {
        self.send_frame(Frame::new(Command::Unsubscribe).header("id", subscription.to_string()))?;
        tracing::debug!("Unsubscribed {}", subscription);
        Ok(())
    }

    fn publish(&mut self, destination: &str, body: &str) -> Result<(), TransportError> {
        self.send_frame(
            Frame::new(Command::Send)
                .header("destination", destination)
                .header("content-type", "application/json")
                .body(body),
        )
    }

    fn deactivate(&mut self) {
        if self.reader.is_none() {
            return;
        }
        self.send_frame(Frame::new(Command::Disconnect)).ok();
        self.outbound.send(Message::Close(None)).ok();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        tracing::debug!("Connection deactivated");
    }
}

impl Drop for StompConnection {
    fn drop(&mut self) {
        self.deactivate();
    }
}
