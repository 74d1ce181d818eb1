//! Periodic audio traffic counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default reporting interval
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Audio traffic counters, reset on every reporting tick
#[derive(Debug, Default)]
pub struct Metrics {
    packets_tx: AtomicU64,
    samples_tx: AtomicU64,
    packets_rx: AtomicU64,
    samples_rx: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Packets sent since the last reset
    pub packets_tx: u64,
    /// Samples sent since the last reset
    pub samples_tx: u64,
    /// Packets received since the last reset
    pub packets_rx: u64,
    /// Samples received since the last reset
    pub samples_rx: u64,
    /// Malformed inbound frames dropped since the last reset
    pub frames_dropped: u64,
}

impl Metrics {
    /// Record one outbound packet and its sample count
    pub fn record_tx(&self, samples: usize) {
        self.packets_tx.fetch_add(1, Ordering::Relaxed);
        self.samples_tx.fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Record one inbound packet and its sample count
    pub fn record_rx(&self, samples: usize) {
        self.packets_rx.fetch_add(1, Ordering::Relaxed);
        self.samples_rx.fetch_add(samples as u64, Ordering::Relaxed);
    }

    /// Record one dropped inbound frame
    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Read the counters without resetting them
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_tx: self.packets_tx.load(Ordering::Relaxed),
            samples_tx: self.samples_tx.load(Ordering::Relaxed),
            packets_rx: self.packets_rx.load(Ordering::Relaxed),
            samples_rx: self.samples_rx.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Read the counters and reset them to zero
    pub fn snapshot_and_reset(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_tx: self.packets_tx.swap(0, Ordering::Relaxed),
            samples_tx: self.samples_tx.swap(0, Ordering::Relaxed),
            packets_rx: self.packets_rx.swap(0, Ordering::Relaxed),
            samples_rx: self.samples_rx.swap(0, Ordering::Relaxed),
            frames_dropped: self.frames_dropped.swap(0, Ordering::Relaxed),
        }
    }
}

/// Background task logging and resetting the counters on an interval
pub struct MetricsAggregator {
    handle: JoinHandle<()>,
}

impl MetricsAggregator {
    /// Start the reporting task
    pub fn spawn(metrics: Arc<Metrics>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let snapshot = metrics.snapshot_and_reset();
                debug!(
                    "Audio metrics: packets tx={} samples tx={} packets rx={} samples rx={} dropped={}",
                    snapshot.packets_tx,
                    snapshot.samples_tx,
                    snapshot.packets_rx,
                    snapshot.samples_rx,
                    snapshot.frames_dropped
                );
            }
        });

        Self { handle }
    }

    /// Stop the reporting task
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for MetricsAggregator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::default();
        metrics.record_tx(160);
        metrics.record_tx(160);
        metrics.record_rx(320);
        metrics.record_dropped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.packets_tx, 2);
        assert_eq!(snapshot.samples_tx, 320);
        assert_eq!(snapshot.packets_rx, 1);
        assert_eq!(snapshot.samples_rx, 320);
        assert_eq!(snapshot.frames_dropped, 1);
    }

    #[test]
    fn test_snapshot_and_reset_zeroes() {
        let metrics = Metrics::default();
        metrics.record_tx(10);
        metrics.record_rx(20);

        let first = metrics.snapshot_and_reset();
        assert_eq!(first.packets_tx, 1);
        assert_eq!(first.samples_rx, 20);

        let second = metrics.snapshot();
        assert_eq!(second.packets_tx, 0);
        assert_eq!(second.samples_tx, 0);
        assert_eq!(second.packets_rx, 0);
        assert_eq!(second.samples_rx, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregator_resets_on_tick() {
        let metrics = Arc::new(Metrics::default());
        let aggregator = MetricsAggregator::spawn(metrics.clone(), Duration::from_secs(5));

        metrics.record_tx(100);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(metrics.snapshot().packets_tx, 0);
        aggregator.stop();
    }
}
