//! Connection coordinator and public client handle
//!
//! The coordinator is a single task owning the connection state, the
//! signaling channel and the active media transport. Everything the
//! caller does goes through fire-and-forget commands; everything the
//! caller observes comes back as [`ClientEvent`]s.

use crate::config::{IceConfig, SessionConfig, TransportKind};
use crate::metrics::{Metrics, MetricsAggregator, REPORT_INTERVAL};
use crate::packet::{AudioFrame, AudioHeader};
use crate::signaling::{
    ClientMessage, SetupRequest, SignalingChannel, SignalingEvent, SignalingSender,
};
use crate::timeout::{EscalatingTimeout, TimerFired, TimerPhase};
use crate::transport::{
    MediaSource, MediaTransport, PeerTransport, RelayTransport, TransportEvent,
};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Connection life-cycle, owned exclusively by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet opened
    Idle,
    /// Signaling channel being established
    Connecting,
    /// Setup handshake sent, waiting for the ready signal
    AwaitingSetup,
    /// Ready received, media transport negotiating
    NegotiatingTransport,
    /// Audio path established
    Connected,
    /// Signaling channel lost; a reconnect signal restarts the attempt
    Disconnected,
    /// Terminal
    Closed,
}

/// Events republished to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The media transport accepts work
    Ready,
    /// The audio path is established
    Connected,
    /// The audio path or signaling channel was lost
    Disconnected,
    /// Decoded inbound audio samples
    Audio(Vec<i16>),
    /// A response timer elapsed; the attempt may still succeed
    ConnectionTimeout(String),
    /// A failure timer elapsed; the attempt is over until reopened
    ConnectionFailure(String),
    /// The client was closed (emitted exactly once)
    Closed,
    /// Non-fatal channel error
    Error(String),
}

/// Commands from the public handle to the coordinator task
enum Command {
    SendFrame(Bytes),
    SetMediaSource(MediaSource),
    SetMicEnable(bool),
    SetSpkrEnable(bool),
    Close { graceful: bool },
}

/// Client for one participant's audio session in a room
///
/// Opening the client validates the configuration, opens the signaling
/// channel and starts the setup handshake; progress arrives on the
/// event receiver. Dropping the handle terminates the session.
#[derive(Debug)]
pub struct AudioRouterClient {
    config: SessionConfig,
    commands: mpsc::UnboundedSender<Command>,
    events: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    metrics: Arc<Metrics>,
    state: watch::Receiver<ConnectionState>,
}

impl AudioRouterClient {
    /// Validate the configuration and open the session
    ///
    /// The signaling channel is opened immediately and both connection
    /// timers are armed. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the missing field.
    pub fn open(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let channel = SignalingChannel::connect(&config.signaling_url);
        Self::open_with_channel(config, channel)
    }

    /// Open the session over a pre-built signaling channel
    ///
    /// Used with [`SignalingChannel::in_process`] to drive the client
    /// without a server.
    pub fn open_with_channel(config: SessionConfig, mut channel: SignalingChannel) -> Result<Self> {
        config.validate()?;

        let connection_id = uuid::Uuid::new_v4();
        info!(
            "Creating audio session client: connection={} account={} room={} participant={}",
            connection_id, config.account, config.room, config.participant
        );

        let signaling_events = channel
            .take_events()
            .ok_or_else(|| Error::Signaling("signaling channel events already taken".to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let metrics = Arc::new(Metrics::default());

        let coordinator = Coordinator {
            config: config.clone(),
            sender: channel.sender(),
            events: event_tx,
            metrics: metrics.clone(),
            transport_events: transport_tx,
            timers: EscalatingTimeout::with_defaults(timer_tx),
            transport: None,
            transport_ready: false,
            state: state_tx,
            aggregator: MetricsAggregator::spawn(metrics.clone(), REPORT_INTERVAL),
        };
        tokio::spawn(coordinator.run(cmd_rx, signaling_events, transport_rx, timer_rx));

        Ok(Self {
            config,
            commands: cmd_tx,
            events: Some(event_rx),
            metrics,
            state: state_rx,
        })
    }

    /// Take the event receiver; yields once, `None` afterwards
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events.take()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Shared traffic counters
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Session configuration this client was opened with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Send an audio frame
    ///
    /// Transmit counters are updated first, whether or not a transport
    /// is ready; without one the frame is dropped silently.
    pub fn send(&self, frame: &AudioFrame) -> Result<()> {
        self.metrics.record_tx(frame.samples.len());
        let bytes = frame.encode()?;
        let _ = self.commands.send(Command::SendFrame(bytes));
        Ok(())
    }

    /// Send raw samples, framing them with this session's identity
    pub fn send_audio(&self, samples: &[i16]) -> Result<()> {
        let header = AudioHeader {
            acnt: self.config.account.clone(),
            rm: self.config.room.clone(),
            ppt: self.config.participant.clone(),
            cnt: samples.len() as u32,
            rate: self.config.sample_rate,
        };
        self.send(&AudioFrame::new(header, samples.to_vec()))
    }

    /// Attach or swap the local media source (peer transport only)
    pub fn set_media_source(&self, source: MediaSource) {
        let _ = self.commands.send(Command::SetMediaSource(source));
    }

    /// Toggle the server-side microphone path
    pub fn set_mic_enabled(&self, enable: bool) {
        let _ = self.commands.send(Command::SetMicEnable(enable));
    }

    /// Toggle the server-side speaker path
    pub fn set_speaker_enabled(&self, enable: bool) {
        let _ = self.commands.send(Command::SetSpkrEnable(enable));
    }

    /// Close the session gracefully; idempotent
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close { graceful: true });
    }

    /// Close the session without the goodbye to the server; idempotent
    pub fn terminate(&self) {
        let _ = self.commands.send(Command::Close { graceful: false });
    }
}

impl Drop for AudioRouterClient {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close { graceful: false });
    }
}

/// Coordinator task state; mutated only inside the event loop
struct Coordinator {
    config: SessionConfig,
    sender: SignalingSender,
    events: mpsc::UnboundedSender<ClientEvent>,
    metrics: Arc<Metrics>,
    transport_events: mpsc::UnboundedSender<TransportEvent>,
    timers: EscalatingTimeout,
    transport: Option<MediaTransport>,
    transport_ready: bool,
    state: watch::Sender<ConnectionState>,
    aggregator: MetricsAggregator,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signaling: mpsc::UnboundedReceiver<SignalingEvent>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut timer_events: mpsc::UnboundedReceiver<TimerFired>,
    ) {
        self.set_state(ConnectionState::Connecting);
        self.timers.arm();

        loop {
            tokio::select! {
                Some(cmd) = commands.recv() => {
                    if self.handle_command(cmd) {
                        break;
                    }
                }
                Some(event) = signaling.recv() => self.handle_signaling(event),
                Some(event) = transport_events.recv() => self.handle_transport(event),
                Some(fired) = timer_events.recv() => self.handle_timer(fired),
                else => break,
            }
        }

        debug!("Coordinator task terminated");
    }

    /// Returns true when the session is closed and the loop must end
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SendFrame(frame) => {
                // Transmit counters were updated at the call site.
                if self.transport_ready {
                    if let Some(transport) = &self.transport {
                        transport.send_frame(frame);
                    }
                }
                false
            }
            Command::SetMediaSource(source) => {
                match &self.transport {
                    Some(transport) => transport.set_media_source(source),
                    None => debug!("No transport yet, dropping media source"),
                }
                false
            }
            Command::SetMicEnable(enable) => {
                debug!("Setting microphone enable: {}", enable);
                self.sender.send(ClientMessage::SetMicEnable(enable));
                false
            }
            Command::SetSpkrEnable(enable) => {
                debug!("Setting speaker enable: {}", enable);
                self.sender.send(ClientMessage::SetSpkrEnable(enable));
                false
            }
            Command::Close { graceful } => {
                self.close(graceful);
                true
            }
        }
    }

    /// Tear down timers, transport and channel, in that order
    fn close(&mut self, graceful: bool) {
        info!("Closing connection");
        self.timers.cancel();
        self.aggregator.stop();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.transport_ready = false;
        if graceful {
            self.sender.close();
        }
        self.set_state(ConnectionState::Closed);
        let _ = self.events.send(ClientEvent::Closed);
    }

    fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connect => {
                debug!("Signaling channel connected");
                self.send_setup();
                self.set_state(ConnectionState::AwaitingSetup);
            }
            SignalingEvent::Reconnect => {
                debug!("Signaling channel reconnected");
                self.set_state(ConnectionState::Connecting);
                self.timers.arm();
                self.send_setup();
                self.set_state(ConnectionState::AwaitingSetup);
            }
            SignalingEvent::Ready(ice) => self.handle_ready(ice),
            SignalingEvent::Signal(value) => match &self.transport {
                Some(transport) => transport.handle_signal(value),
                None => debug!("Dropping signal without an active transport"),
            },
            SignalingEvent::Binary(data) => {
                if let Some(transport) = &self.transport {
                    transport.handle_binary(data);
                }
            }
            SignalingEvent::Disconnect => {
                info!("Disconnected from signaling server");
                if let Some(transport) = self.transport.take() {
                    transport.close();
                }
                self.transport_ready = false;
                self.set_state(ConnectionState::Disconnected);
                let _ = self.events.send(ClientEvent::Disconnected);
            }
            SignalingEvent::ConnectTimeout => {
                warn!("Signaling channel connect timeout");
                let _ = self.events.send(ClientEvent::ConnectionTimeout(
                    "signaling connect timeout".to_string(),
                ));
            }
            SignalingEvent::ReconnectFailed => {
                error!("Signaling channel gave up reconnecting");
                let _ = self.events.send(ClientEvent::ConnectionFailure(
                    "signaling reconnect failed".to_string(),
                ));
            }
            SignalingEvent::ReconnectError(err) => {
                let _ = self.events.send(ClientEvent::Error(err));
            }
            SignalingEvent::Error(err) => {
                warn!("Signaling channel error: {}", err);
                let _ = self.events.send(ClientEvent::Error(err));
            }
        }
    }

    /// Ready signal: cancel the setup timers and bring up the transport
    fn handle_ready(&mut self, ice: Option<IceConfig>) {
        debug!("Setup ready, creating {:?} transport", self.config.transport);
        self.timers.cancel();
        self.set_state(ConnectionState::NegotiatingTransport);

        let transport = match self.config.transport {
            TransportKind::Relay => MediaTransport::Relay(RelayTransport::new(
                self.sender.clone(),
                self.transport_events.clone(),
                self.metrics.clone(),
            )),
            TransportKind::Peer => MediaTransport::Peer(PeerTransport::new(
                ice,
                self.config.use_udp,
                self.transport_events.clone(),
                self.metrics.clone(),
            )),
        };
        self.transport = Some(transport);
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Ready => {
                debug!("Transport is now ready");
                self.transport_ready = true;
                let _ = self.events.send(ClientEvent::Ready);
            }
            TransportEvent::Connected => {
                info!("Transport is now connected");
                self.set_state(ConnectionState::Connected);
                let _ = self.events.send(ClientEvent::Connected);
            }
            TransportEvent::Disconnected => {
                info!("Transport disconnected");
                let _ = self.events.send(ClientEvent::Disconnected);
            }
            TransportEvent::Audio(samples) => {
                self.metrics.record_rx(samples.len());
                let _ = self.events.send(ClientEvent::Audio(samples));
            }
            TransportEvent::ConnectionTimeout(msg) => {
                let _ = self.events.send(ClientEvent::ConnectionTimeout(msg));
            }
            TransportEvent::ConnectionFailure(msg) => {
                let _ = self.events.send(ClientEvent::ConnectionFailure(msg));
            }
            TransportEvent::Signal(value) => {
                self.sender.send(ClientMessage::Signal(value));
            }
        }
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        if !self.timers.is_current(&fired) {
            return;
        }
        match fired.phase {
            TimerPhase::Response => {
                warn!("Connection timed out waiting for setup response");
                let _ = self.events.send(ClientEvent::ConnectionTimeout(
                    "did not receive setup response".to_string(),
                ));
            }
            TimerPhase::Failure => {
                self.timers.cancel();
                error!("Connection failed waiting for setup response");
                let _ = self.events.send(ClientEvent::ConnectionFailure(
                    "did not receive setup response".to_string(),
                ));
            }
        }
    }

    fn send_setup(&self) {
        debug!("Sending setup handshake");
        self.sender.send(ClientMessage::Setup(SetupRequest {
            udp: self.config.use_udp,
            protocol: self.config.transport,
            account: self.config.account.clone(),
            room: self.config.room.clone(),
            participant: self.config.participant.clone(),
        }));
    }

    fn set_state(&self, next: ConnectionState) {
        let current = *self.state.borrow();
        if current != next {
            debug!("Connection state transition: {:?} -> {:?}", current, next);
            let _ = self.state.send(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SessionConfig {
        SessionConfig::new("ws://localhost:4000", "000-account", "000-room", "000-participant", 48000)
    }

    #[tokio::test]
    async fn test_open_rejects_missing_account() {
        let mut config = valid_config();
        config.account = String::new();
        let (channel, _server) = SignalingChannel::in_process();

        let err = AudioRouterClient::open_with_channel(config, channel).unwrap_err();
        assert!(err.to_string().contains("account"));
    }

    #[tokio::test]
    async fn test_open_starts_in_connecting() {
        let (channel, _server) = SignalingChannel::in_process();
        let client = AudioRouterClient::open_with_channel(valid_config(), channel).unwrap();

        // The coordinator task has not run yet on this turn.
        assert_eq!(client.state(), ConnectionState::Idle);
        tokio::task::yield_now().await;
        assert_eq!(client.state(), ConnectionState::Connecting);
        client.terminate();
    }

    #[tokio::test]
    async fn test_send_updates_tx_metrics_without_transport() {
        let (channel, _server) = SignalingChannel::in_process();
        let client = AudioRouterClient::open_with_channel(valid_config(), channel).unwrap();

        client.send_audio(&[1, 2, 3, 4]).unwrap();
        let snapshot = client.metrics().snapshot();
        assert_eq!(snapshot.packets_tx, 1);
        assert_eq!(snapshot.samples_tx, 4);
        client.terminate();
    }

    #[tokio::test]
    async fn test_events_receiver_yields_once() {
        let (channel, _server) = SignalingChannel::in_process();
        let mut client = AudioRouterClient::open_with_channel(valid_config(), channel).unwrap();

        assert!(client.events().is_some());
        assert!(client.events().is_none());
        client.terminate();
    }
}
