//! Server-relayed audio transport
//!
//! A thin framed pass-through: encoded frames go out the signaling
//! channel's binary path, inbound binary frames are decoded and
//! re-emitted as audio. There is no negotiation phase; readiness is
//! reported from a spawned task so callers attach listeners first.

use super::TransportEvent;
use crate::metrics::Metrics;
use crate::packet;
use crate::signaling::SignalingSender;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Relay transport over the signaling-adjacent binary data path
pub struct RelayTransport {
    sender: SignalingSender,
    events: mpsc::UnboundedSender<TransportEvent>,
    metrics: Arc<Metrics>,
}

impl RelayTransport {
    /// Create the transport; `Ready` and `Connected` are emitted on the
    /// next scheduling turn, never synchronously.
    pub fn new(
        sender: SignalingSender,
        events: mpsc::UnboundedSender<TransportEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        debug!("Creating relay transport");

        let deferred = events.clone();
        tokio::spawn(async move {
            let _ = deferred.send(TransportEvent::Ready);
            let _ = deferred.send(TransportEvent::Connected);
        });

        Self {
            sender,
            events,
            metrics,
        }
    }

    /// Write an encoded frame to the relay channel
    pub fn send_frame(&self, frame: Bytes) {
        self.sender.send_binary(frame);
    }

    /// Decode an inbound binary frame and re-emit it as audio
    ///
    /// Malformed frames are dropped and counted, never fatal.
    pub fn handle_binary(&self, data: Bytes) {
        match packet::decode(&data) {
            Ok(samples) => {
                let _ = self.events.send(TransportEvent::Audio(samples));
            }
            Err(e) => {
                warn!("Dropping malformed relay frame: {}", e);
                self.metrics.record_dropped();
            }
        }
    }

    /// Release the transport (nothing to tear down beyond the handle)
    pub fn close(&self) {
        debug!("Relay transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::AudioHeader;
    use crate::signaling::SignalingChannel;

    fn test_header(count: u32) -> AudioHeader {
        AudioHeader {
            acnt: "a".to_string(),
            rm: "r".to_string(),
            ppt: "p".to_string(),
            cnt: count,
            rate: 48000,
        }
    }

    #[tokio::test]
    async fn test_ready_and_connected_are_deferred() {
        let (channel, _server) = SignalingChannel::in_process();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = RelayTransport::new(channel.sender(), tx, Arc::new(Metrics::default()));

        assert!(matches!(rx.try_recv(), Err(_)));
        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::Ready));
        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::Connected));
    }

    #[tokio::test]
    async fn test_inbound_frame_decodes_to_audio() {
        let (channel, _server) = SignalingChannel::in_process();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = RelayTransport::new(channel.sender(), tx, Arc::new(Metrics::default()));

        let samples = vec![1, -2, 10, 2570];
        let frame = packet::encode(&test_header(samples.len() as u32), &samples).unwrap();
        transport.handle_binary(frame);

        loop {
            match rx.recv().await.unwrap() {
                TransportEvent::Audio(decoded) => {
                    assert_eq!(decoded, samples);
                    break;
                }
                TransportEvent::Ready | TransportEvent::Connected => continue,
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_is_counted_not_emitted() {
        let (channel, _server) = SignalingChannel::in_process();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(Metrics::default());
        let transport = RelayTransport::new(channel.sender(), tx, metrics.clone());

        transport.handle_binary(Bytes::from_static(&[1, 2, 3, 4]));

        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::Ready));
        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::Connected));
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().frames_dropped, 1);
    }
}
