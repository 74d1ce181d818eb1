//! Directly negotiated peer transport
//!
//! Owns the WebRTC peer connection and the negotiation state for one
//! connection attempt. Offers are rewritten to prefer opus before they
//! leave; framed audio travels over the `audio` data channel while the
//! attached media source feeds the RTP path.

use super::{MediaSource, TransportEvent};
use crate::config::IceConfig;
use crate::metrics::Metrics;
use crate::packet;
use crate::sdp;
use crate::signaling::SignalMessage;
use crate::timeout::{EscalatingTimeout, TimerFired, TimerPhase};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

/// Label of the data channel carrying framed audio
const AUDIO_CHANNEL_LABEL: &str = "audio";

/// Commands accepted by the transport task
enum PeerCommand {
    SetMediaSource(MediaSource),
    Signal(serde_json::Value),
    SendFrame(Bytes),
    Close,
}

/// Callback traffic from the peer connection capability
enum PcEvent {
    ConnectionState(RTCPeerConnectionState),
    SignalingState(RTCSignalingState),
    LocalCandidate(Option<RTCIceCandidateInit>),
    IncomingChannel(Arc<RTCDataChannel>),
    ChannelOpen,
    ChannelClosed,
    ChannelFrame(Bytes),
}

/// Negotiation state for one connection attempt
#[derive(Default)]
struct NegotiationContext {
    local_description: Option<String>,
    remote_description: Option<String>,
    pending_candidates: Vec<RTCIceCandidateInit>,
    renegotiating: bool,
}

/// Handle to the peer transport task
pub struct PeerTransport {
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerTransport {
    /// Create the transport; `Ready` is emitted on the next scheduling
    /// turn. The peer connection itself is not built until the first
    /// media source arrives.
    pub fn new(
        ice: Option<IceConfig>,
        unreliable: bool,
        events: mpsc::UnboundedSender<TransportEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        debug!("Creating peer transport");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (pc_tx, pc_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let task = PeerTask {
            ice: ice.unwrap_or_default(),
            unreliable,
            events,
            metrics,
            pc_events: pc_tx,
            pc: None,
            audio_channel: None,
            channel_open: false,
            media_sender: None,
            context: None,
            timers: EscalatingTimeout::with_defaults(timer_tx),
            connected: false,
        };
        tokio::spawn(task.run(cmd_rx, pc_rx, timer_rx));

        Self { commands: cmd_tx }
    }

    /// Attach or swap the local media source
    pub fn set_media_source(&self, source: MediaSource) {
        let _ = self.commands.send(PeerCommand::SetMediaSource(source));
    }

    /// Apply an inbound negotiation payload
    pub fn handle_signal(&self, value: serde_json::Value) {
        let _ = self.commands.send(PeerCommand::Signal(value));
    }

    /// Queue an encoded audio frame for the data channel
    pub fn send_frame(&self, frame: Bytes) {
        let _ = self.commands.send(PeerCommand::SendFrame(frame));
    }

    /// Release the peer connection and negotiation state
    pub fn close(&self) {
        let _ = self.commands.send(PeerCommand::Close);
    }
}

impl Drop for PeerTransport {
    fn drop(&mut self) {
        let _ = self.commands.send(PeerCommand::Close);
    }
}

/// Task state; every mutation happens inside the event loop
struct PeerTask {
    ice: IceConfig,
    unreliable: bool,
    events: mpsc::UnboundedSender<TransportEvent>,
    metrics: Arc<Metrics>,
    pc_events: mpsc::UnboundedSender<PcEvent>,
    pc: Option<Arc<RTCPeerConnection>>,
    audio_channel: Option<Arc<RTCDataChannel>>,
    channel_open: bool,
    media_sender: Option<Arc<RTCRtpSender>>,
    context: Option<NegotiationContext>,
    timers: EscalatingTimeout,
    connected: bool,
}

impl PeerTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PeerCommand>,
        mut pc_events: mpsc::UnboundedReceiver<PcEvent>,
        mut timer_events: mpsc::UnboundedReceiver<TimerFired>,
    ) {
        let _ = self.events.send(TransportEvent::Ready);

        loop {
            tokio::select! {
                Some(cmd) = commands.recv() => match cmd {
                    PeerCommand::SetMediaSource(source) => self.handle_set_media_source(source).await,
                    PeerCommand::Signal(value) => self.handle_signal(value).await,
                    PeerCommand::SendFrame(frame) => self.handle_send_frame(frame).await,
                    PeerCommand::Close => break,
                },
                Some(event) = pc_events.recv() => self.handle_pc_event(event).await,
                Some(fired) = timer_events.recv() => self.handle_timer(fired),
                else => break,
            }
        }

        self.shutdown().await;
    }

    /// First call builds the peer connection and starts negotiation;
    /// later calls swap the source and re-offer without re-arming the
    /// setup timers.
    async fn handle_set_media_source(&mut self, source: MediaSource) {
        if let Some(pc) = self.pc.clone() {
            debug!("Swapping media source, renegotiating");
            if let Some(ctx) = self.context.as_mut() {
                ctx.renegotiating = true;
            }
            if let Some(old) = self.media_sender.take() {
                if let Err(e) = pc
                    .remove_track(&old)
                    .await
                    .map_err(|e| Error::MediaTrack(format!("Failed to remove track: {}", e)))
                {
                    warn!("{}", e);
                }
            }
            match self.attach_source(&pc, source).await {
                Ok(sender) => self.media_sender = Some(sender),
                Err(e) => {
                    warn!("{}", e);
                    return;
                }
            }
            if let Err(e) = self.create_and_send_offer(&pc).await {
                warn!("{}", e);
            }
            return;
        }

        debug!("Setting media source, creating peer connection");
        let pc = match self.create_peer_connection().await {
            Ok(pc) => pc,
            Err(e) => {
                error!("{}", e);
                let _ = self
                    .events
                    .send(TransportEvent::ConnectionFailure(e.to_string()));
                return;
            }
        };

        self.context = Some(NegotiationContext::default());
        match self.attach_source(&pc, source).await {
            Ok(sender) => self.media_sender = Some(sender),
            Err(e) => warn!("{}", e),
        }
        if let Err(e) = self.create_audio_channel(&pc).await {
            warn!("{}", e);
        }
        if let Err(e) = self.create_and_send_offer(&pc).await {
            warn!("{}", e);
        }
        self.pc = Some(pc);
        self.timers.arm();
    }

    async fn attach_source(
        &self,
        pc: &Arc<RTCPeerConnection>,
        source: MediaSource,
    ) -> Result<Arc<RTCRtpSender>> {
        pc.add_track(source)
            .await
            .map_err(|e| Error::MediaTrack(format!("Failed to attach media source: {}", e)))
    }

    /// Build the peer connection capability and wire its callbacks into
    /// the task's event channel
    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnection(format!("Failed to register codecs: {}", e)))?;
        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::PeerConnection(format!("Failed to register interceptors: {}", e)))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = self
            .ice
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                Error::PeerConnection(format!("Failed to create peer connection: {}", e))
            })?,
        );

        let tx = self.pc_events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PcEvent::ConnectionState(state));
            })
        }));

        let tx = self.pc_events.clone();
        pc.on_signaling_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PcEvent::SignalingState(state));
            })
        }));

        let tx = self.pc_events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => {
                            let _ = tx.send(PcEvent::LocalCandidate(Some(init)));
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    },
                    None => {
                        let _ = tx.send(PcEvent::LocalCandidate(None));
                    }
                }
            })
        }));

        let tx = self.pc_events.clone();
        pc.on_data_channel(Box::new(move |channel| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PcEvent::IncomingChannel(channel));
            })
        }));

        Ok(pc)
    }

    /// Create the framed-audio data channel on the offering side
    async fn create_audio_channel(&mut self, pc: &Arc<RTCPeerConnection>) -> Result<()> {
        let init = RTCDataChannelInit {
            ordered: Some(!self.unreliable),
            max_retransmits: if self.unreliable { Some(0) } else { None },
            ..Default::default()
        };

        let channel = pc
            .create_data_channel(AUDIO_CHANNEL_LABEL, Some(init))
            .await
            .map_err(|e| Error::DataChannel(format!("Failed to create audio channel: {}", e)))?;
        self.wire_audio_channel(&channel);
        self.audio_channel = Some(channel);
        Ok(())
    }

    fn wire_audio_channel(&self, channel: &Arc<RTCDataChannel>) {
        let tx = self.pc_events.clone();
        channel.on_open(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PcEvent::ChannelOpen);
            })
        }));

        let tx = self.pc_events.clone();
        channel.on_close(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PcEvent::ChannelClosed);
            })
        }));

        let tx = self.pc_events.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PcEvent::ChannelFrame(msg.data));
            })
        }));
    }

    /// Create an offer, rewrite it for opus preference, set it locally
    /// and hand it to the signaling channel
    async fn create_and_send_offer(&mut self, pc: &Arc<RTCPeerConnection>) -> Result<()> {
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create offer: {}", e)))?;

        let rewritten = sdp::prefer_opus(&offer.sdp);
        let local = RTCSessionDescription::offer(rewritten.clone())
            .map_err(|e| Error::Sdp(format!("Failed to build rewritten offer: {}", e)))?;
        pc.set_local_description(local)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

        if let Some(ctx) = self.context.as_mut() {
            ctx.local_description = Some(rewritten.clone());
        }
        self.send_signal(SignalMessage::Offer { sdp: rewritten });
        Ok(())
    }

    fn send_signal(&self, msg: SignalMessage) {
        match msg.to_value() {
            Ok(value) => {
                let _ = self.events.send(TransportEvent::Signal(value));
            }
            Err(e) => warn!("Failed to serialize signal: {}", e),
        }
    }

    /// Apply an offer/answer/candidate from the remote side
    ///
    /// Failures here are logged and non-fatal; a stalled negotiation
    /// surfaces through the failure timer instead.
    async fn handle_signal(&mut self, value: serde_json::Value) {
        let msg = match SignalMessage::from_value(value) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Ignoring invalid signal payload: {}", e);
                return;
            }
        };

        let Some(pc) = self.pc.clone() else {
            warn!("Ignoring signal before negotiation started");
            return;
        };

        let applied = match msg {
            SignalMessage::Answer { sdp } => self.apply_answer(&pc, sdp).await,
            SignalMessage::Offer { sdp } => self.apply_offer(&pc, sdp).await,
            SignalMessage::Candidate {
                label,
                id,
                candidate,
            } => {
                self.apply_candidate(
                    &pc,
                    RTCIceCandidateInit {
                        candidate,
                        sdp_mid: id,
                        sdp_mline_index: label,
                        username_fragment: None,
                    },
                )
                .await
            }
        };

        // Application failures stall the negotiation into the failure
        // timer instead of tearing anything down here.
        if let Err(e) = applied {
            warn!("{}", e);
        }
    }

    async fn apply_answer(&mut self, pc: &Arc<RTCPeerConnection>, sdp: String) -> Result<()> {
        debug!("Answer received");
        let desc = RTCSessionDescription::answer(sdp.clone())
            .map_err(|e| Error::Sdp(format!("Failed to parse answer: {}", e)))?;
        pc.set_remote_description(desc)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))?;

        if let Some(ctx) = self.context.as_mut() {
            ctx.remote_description = Some(sdp);
            ctx.renegotiating = false;
        }
        self.flush_pending_candidates(pc).await;
        Ok(())
    }

    /// Answering side: apply the remote offer and reply, with the same
    /// opus rewrite as outgoing offers
    async fn apply_offer(&mut self, pc: &Arc<RTCPeerConnection>, sdp: String) -> Result<()> {
        debug!("Offer received");
        let desc = RTCSessionDescription::offer(sdp.clone())
            .map_err(|e| Error::Sdp(format!("Failed to parse offer: {}", e)))?;
        pc.set_remote_description(desc)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))?;

        if let Some(ctx) = self.context.as_mut() {
            ctx.remote_description = Some(sdp);
        }
        self.flush_pending_candidates(pc).await;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;
        let rewritten = sdp::prefer_opus(&answer.sdp);
        let local = RTCSessionDescription::answer(rewritten.clone())
            .map_err(|e| Error::Sdp(format!("Failed to build rewritten answer: {}", e)))?;
        pc.set_local_description(local)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

        if let Some(ctx) = self.context.as_mut() {
            ctx.local_description = Some(rewritten.clone());
        }
        self.send_signal(SignalMessage::Answer { sdp: rewritten });
        Ok(())
    }

    async fn apply_candidate(
        &mut self,
        pc: &Arc<RTCPeerConnection>,
        init: RTCIceCandidateInit,
    ) -> Result<()> {
        let remote_set = self
            .context
            .as_ref()
            .map(|ctx| ctx.remote_description.is_some())
            .unwrap_or(false);
        if !remote_set {
            debug!("Buffering remote candidate until the remote description is set");
            if let Some(ctx) = self.context.as_mut() {
                ctx.pending_candidates.push(init);
            }
            return Ok(());
        }

        debug!("Candidate received");
        pc.add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add remote candidate: {}", e)))
    }

    async fn flush_pending_candidates(&mut self, pc: &Arc<RTCPeerConnection>) {
        let pending = match self.context.as_mut() {
            Some(ctx) => std::mem::take(&mut ctx.pending_candidates),
            None => return,
        };
        for init in pending {
            if let Err(e) = pc.add_ice_candidate(init).await {
                warn!("Failed to add buffered candidate: {}", e);
            }
        }
    }

    async fn handle_send_frame(&self, frame: Bytes) {
        if !self.channel_open {
            return;
        }
        if let Some(channel) = &self.audio_channel {
            if let Err(e) = channel.send(&frame).await {
                warn!("Failed to send audio frame: {}", e);
            }
        }
    }

    async fn handle_pc_event(&mut self, event: PcEvent) {
        match event {
            PcEvent::ConnectionState(state) => {
                debug!("Peer connection state changed: {:?}", state);
                match state {
                    RTCPeerConnectionState::Connected => {
                        self.timers.cancel();
                        if !self.connected {
                            self.connected = true;
                            let _ = self.events.send(TransportEvent::Connected);
                        }
                    }
                    RTCPeerConnectionState::Failed => {
                        let _ = self.events.send(TransportEvent::ConnectionFailure(
                            "peer connection failed".to_string(),
                        ));
                    }
                    RTCPeerConnectionState::Disconnected => {
                        self.connected = false;
                        let _ = self.events.send(TransportEvent::Disconnected);
                    }
                    _ => {}
                }
            }
            PcEvent::SignalingState(state) => {
                // Observability only; no state transition is driven here.
                debug!("Signaling state changed: {:?}", state);
            }
            PcEvent::LocalCandidate(Some(init)) => {
                debug!("Local candidate gathered");
                self.send_signal(SignalMessage::Candidate {
                    label: init.sdp_mline_index,
                    id: init.sdp_mid,
                    candidate: init.candidate,
                });
            }
            PcEvent::LocalCandidate(None) => {
                debug!("End of local candidates");
            }
            PcEvent::IncomingChannel(channel) => {
                debug!("Remote data channel: {}", channel.label());
                self.wire_audio_channel(&channel);
                self.audio_channel = Some(channel);
            }
            PcEvent::ChannelOpen => {
                debug!("Audio data channel open");
                self.channel_open = true;
            }
            PcEvent::ChannelClosed => {
                self.channel_open = false;
            }
            PcEvent::ChannelFrame(data) => match packet::decode(&data) {
                Ok(samples) => {
                    let _ = self.events.send(TransportEvent::Audio(samples));
                }
                Err(e) => {
                    warn!("Dropping malformed audio frame: {}", e);
                    self.metrics.record_dropped();
                }
            },
        }
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        if !self.timers.is_current(&fired) {
            return;
        }
        match fired.phase {
            TimerPhase::Response => {
                warn!("Peer negotiation response timeout");
                let _ = self.events.send(TransportEvent::ConnectionTimeout(
                    "did not complete negotiation in time".to_string(),
                ));
            }
            TimerPhase::Failure => {
                self.timers.cancel();
                error!("Peer negotiation failed to complete");
                let _ = self.events.send(TransportEvent::ConnectionFailure(
                    "negotiation did not complete".to_string(),
                ));
            }
        }
    }

    async fn shutdown(&mut self) {
        self.timers.cancel();
        self.context = None;
        self.channel_open = false;

        if let Some(channel) = self.audio_channel.take() {
            if let Err(e) = channel.close().await {
                debug!("Audio data channel close: {}", e);
            }
        }
        if let Some(pc) = self.pc.take() {
            if let Err(e) = pc.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        }

        debug!("Peer transport terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_is_deferred() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = PeerTransport::new(None, false, tx, Arc::new(Metrics::default()));

        assert!(rx.try_recv().is_err());
        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::Ready));
    }

    #[tokio::test]
    async fn test_signal_before_media_source_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = PeerTransport::new(None, false, tx, Arc::new(Metrics::default()));

        transport.handle_signal(serde_json::json!({"type": "answer", "sdp": "v=0"}));
        transport.handle_signal(serde_json::json!({"bogus": true}));

        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::Ready));
        // Nothing else was emitted; invalid or premature signals are dropped.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_the_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = PeerTransport::new(None, false, tx, Arc::new(Metrics::default()));

        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::Ready));
        transport.close();

        // The task drops its event sender when it terminates.
        assert!(rx.recv().await.is_none());
    }
}
