//! Signaling channel handle
//!
//! The channel is an event source plus a fire-and-forget sender. The
//! WebSocket implementation splits the stream into sender and receiver
//! tasks; the in-process pair gives tests and embedders the same handle
//! backed by plain channels, with the far end scripted directly.

use super::protocol::{ClientMessage, ServerMessage};
use crate::config::IceConfig;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Events produced by the signaling channel
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// Channel established
    Connect,
    /// Setup accepted by the server; optional ICE configuration
    Ready(Option<IceConfig>),
    /// Channel re-established after a drop
    Reconnect,
    /// Channel closed
    Disconnect,
    /// Channel-level connect timeout
    ConnectTimeout,
    /// Channel gave up reconnecting
    ReconnectFailed,
    /// Channel reconnect attempt errored
    ReconnectError(String),
    /// Channel-level error
    Error(String),
    /// Opaque transport negotiation payload
    Signal(serde_json::Value),
    /// Binary audio frame from the relay data path
    Binary(Bytes),
}

/// Outbound traffic handed to the channel task
#[derive(Debug)]
enum Outbound {
    Message(ClientMessage),
    Binary(Bytes),
    Close,
}

/// Cloneable fire-and-forget sender half of a channel
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SignalingSender {
    /// Queue a signaling message; dropped silently if the channel is gone
    pub fn send(&self, msg: ClientMessage) {
        let _ = self.tx.send(Outbound::Message(msg));
    }

    /// Queue a binary audio frame on the relay data path
    pub fn send_binary(&self, frame: Bytes) {
        let _ = self.tx.send(Outbound::Binary(frame));
    }

    /// Request a graceful close (close frame, then teardown)
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Handle to an open signaling channel
#[derive(Debug)]
pub struct SignalingChannel {
    sender: SignalingSender,
    events: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
}

impl SignalingChannel {
    /// Open a WebSocket signaling channel
    ///
    /// Returns immediately; the dial happens in a background task and
    /// the outcome arrives as a `Connect` or `Error` event.
    pub fn connect(url: &str) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();

        let url = url.to_string();
        tokio::spawn(async move {
            info!("Connecting to signaling server: {}", url);
            match connect_async(&url).await {
                Ok((stream, _)) => {
                    info!("Connected to signaling server");
                    let _ = ev_tx.send(SignalingEvent::Connect);

                    let (write, read) = stream.split();
                    tokio::spawn(Self::sender_task(write, out_rx));
                    tokio::spawn(Self::receiver_task(read, ev_tx));
                }
                Err(e) => {
                    error!("Failed to connect to signaling server: {}", e);
                    let _ = ev_tx.send(SignalingEvent::Error(format!(
                        "Failed to connect: {}",
                        e
                    )));
                }
            }
        });

        Self {
            sender: SignalingSender { tx: out_tx },
            events: Some(ev_rx),
        }
    }

    /// Create a loopback channel plus its scripted far end
    ///
    /// The far end receives everything the client sends and can inject
    /// arbitrary [`SignalingEvent`]s, standing in for the server.
    pub fn in_process() -> (Self, SignalingServerEnd) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                let forwarded = match out {
                    Outbound::Message(msg) => server_tx.send(ServerBound::Message(msg)),
                    Outbound::Binary(frame) => server_tx.send(ServerBound::Binary(frame)),
                    Outbound::Close => break,
                };
                if forwarded.is_err() {
                    break;
                }
            }
            let _ = server_tx.send(ServerBound::Closed);
        });

        (
            Self {
                sender: SignalingSender { tx: out_tx },
                events: Some(ev_rx),
            },
            SignalingServerEnd {
                events: ev_tx,
                inbound: server_rx,
            },
        )
    }

    /// Cloneable sender half
    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    /// Take the event receiver; yields once, `None` afterwards
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SignalingEvent>> {
        self.events.take()
    }

    /// Sender task: drains the outbound queue into the socket
    async fn sender_task(
        mut write: futures_util::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Outbound>,
    ) {
        while let Some(out) = rx.recv().await {
            let result = match out {
                Outbound::Message(msg) => match msg.to_json() {
                    Ok(json) => write.send(Message::Text(json)).await,
                    Err(e) => {
                        warn!("Dropping unserializable outbound message: {}", e);
                        continue;
                    }
                },
                Outbound::Binary(frame) => write.send(Message::Binary(frame.to_vec())).await,
                Outbound::Close => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = result {
                error!("Failed to send signaling message: {}", e);
                break;
            }
        }

        debug!("Signaling sender task terminated");
    }

    /// Receiver task: turns socket traffic into channel events
    async fn receiver_task(
        mut read: futures_util::stream::SplitStream<WsStream>,
        events: mpsc::UnboundedSender<SignalingEvent>,
    ) {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(ServerMessage::Ready(ice)) => {
                        let _ = events.send(SignalingEvent::Ready(ice));
                    }
                    Ok(ServerMessage::Signal(value)) => {
                        let _ = events.send(SignalingEvent::Signal(value));
                    }
                    Err(e) => warn!("Ignoring unrecognized signaling message: {}", e),
                },
                Ok(Message::Binary(data)) => {
                    let _ = events.send(SignalingEvent::Binary(Bytes::from(data)));
                }
                Ok(Message::Close(_)) => {
                    info!("Signaling connection closed by server");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Signaling socket error: {}", e);
                    let _ = events.send(SignalingEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        let _ = events.send(SignalingEvent::Disconnect);
        debug!("Signaling receiver task terminated");
    }
}

/// Traffic arriving at the far end of an in-process channel
#[derive(Debug)]
pub enum ServerBound {
    /// A decoded signaling message
    Message(ClientMessage),
    /// A binary audio frame
    Binary(Bytes),
    /// The client side closed the channel
    Closed,
}

/// Scripted far end of an in-process signaling channel
#[derive(Debug)]
pub struct SignalingServerEnd {
    events: mpsc::UnboundedSender<SignalingEvent>,
    inbound: mpsc::UnboundedReceiver<ServerBound>,
}

impl SignalingServerEnd {
    /// Inject an event into the client side
    pub fn emit(&self, event: SignalingEvent) {
        let _ = self.events.send(event);
    }

    /// Receive the next client-side send
    pub async fn recv(&mut self) -> Option<ServerBound> {
        self.inbound.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use crate::signaling::protocol::SetupRequest;

    #[tokio::test]
    async fn test_in_process_round_trip() {
        let (mut channel, mut server) = SignalingChannel::in_process();
        let sender = channel.sender();
        let mut events = channel.take_events().unwrap();

        sender.send(ClientMessage::Setup(SetupRequest {
            udp: false,
            protocol: TransportKind::Relay,
            account: "a".to_string(),
            room: "r".to_string(),
            participant: "p".to_string(),
        }));

        match server.recv().await.unwrap() {
            ServerBound::Message(ClientMessage::Setup(setup)) => {
                assert_eq!(setup.account, "a");
                assert_eq!(setup.protocol, TransportKind::Relay);
            }
            other => panic!("unexpected traffic: {:?}", other),
        }

        server.emit(SignalingEvent::Ready(None));
        assert_eq!(events.recv().await.unwrap(), SignalingEvent::Ready(None));
    }

    #[tokio::test]
    async fn test_in_process_close_reaches_server() {
        let (channel, mut server) = SignalingChannel::in_process();
        channel.sender().close();

        match server.recv().await.unwrap() {
            ServerBound::Closed => {}
            other => panic!("unexpected traffic: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_take_events_yields_once() {
        let (mut channel, _server) = SignalingChannel::in_process();
        assert!(channel.take_events().is_some());
        assert!(channel.take_events().is_none());
    }

    #[tokio::test]
    async fn test_binary_traffic_passes_through() {
        let (channel, mut server) = SignalingChannel::in_process();
        channel.sender().send_binary(Bytes::from_static(b"frame"));

        match server.recv().await.unwrap() {
            ServerBound::Binary(frame) => assert_eq!(&frame[..], b"frame"),
            other => panic!("unexpected traffic: {:?}", other),
        }
    }
}
