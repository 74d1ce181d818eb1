//! Escalating response/failure timeout pair
//!
//! The same two-stage pattern guards both connection setup and peer
//! negotiation: a short response timer whose expiry is informational,
//! and a longer failure timer whose expiry is terminal for the attempt.
//! Arming starts both; success cancels both.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default response timer (informational expiry)
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default failure timer (terminal expiry)
pub const FAILURE_TIMEOUT: Duration = Duration::from_millis(10000);

/// Which stage of the pair elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    /// The short response timer fired; the attempt may still succeed
    Response,
    /// The long failure timer fired; the attempt is over
    Failure,
}

/// Expiry notification delivered to the owner's event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Stage that elapsed
    pub phase: TimerPhase,
    /// Arming generation the expiry belongs to
    pub generation: u64,
}

/// Response/failure timer pair
///
/// Expiries are messages, not callbacks, so a cancel that races an
/// in-flight expiry is resolved by the generation check: a message from
/// a cancelled arming is stale and must be ignored via [`is_current`].
///
/// [`is_current`]: EscalatingTimeout::is_current
pub struct EscalatingTimeout {
    response: Duration,
    failure: Duration,
    tx: mpsc::UnboundedSender<TimerFired>,
    generation: u64,
    armed: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl EscalatingTimeout {
    /// Create an unarmed pair reporting into `tx`
    pub fn new(response: Duration, failure: Duration, tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            response,
            failure,
            tx,
            generation: 0,
            armed: false,
            tasks: Vec::with_capacity(2),
        }
    }

    /// Create a pair with the default 5 s / 10 s durations
    pub fn with_defaults(tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self::new(RESPONSE_TIMEOUT, FAILURE_TIMEOUT, tx)
    }

    /// Arm both timers, invalidating any previous arming
    pub fn arm(&mut self) {
        self.cancel();
        self.generation += 1;
        self.armed = true;

        for (duration, phase) in [
            (self.response, TimerPhase::Response),
            (self.failure, TimerPhase::Failure),
        ] {
            let tx = self.tx.clone();
            let generation = self.generation;
            self.tasks.push(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let _ = tx.send(TimerFired { phase, generation });
            }));
        }
    }

    /// Cancel both timers; queued expiries become stale
    pub fn cancel(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if self.armed {
            self.generation += 1;
            self.armed = false;
        }
    }

    /// Whether the pair is currently armed
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether an expiry belongs to the live arming
    pub fn is_current(&self, fired: &TimerFired) -> bool {
        self.armed && fired.generation == self.generation
    }
}

impl Drop for EscalatingTimeout {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_response_fires_before_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = EscalatingTimeout::with_defaults(tx);
        timers.arm();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.phase, TimerPhase::Response);
        assert!(timers.is_current(&first));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.phase, TimerPhase::Failure);
        assert!(timers.is_current(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers =
            EscalatingTimeout::new(Duration::from_secs(1), Duration::from_secs(2), tx);
        timers.arm();
        timers.cancel();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
        assert!(!timers.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_expiry_is_stale_after_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers =
            EscalatingTimeout::new(Duration::from_millis(10), Duration::from_secs(60), tx);
        timers.arm();

        // Let the response expiry land in the queue, then cancel before
        // the owner drains it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        timers.cancel();

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.phase, TimerPhase::Response);
        assert!(!timers.is_current(&fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_invalidates_previous_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers =
            EscalatingTimeout::new(Duration::from_millis(10), Duration::from_secs(60), tx);
        timers.arm();
        tokio::time::sleep(Duration::from_millis(20)).await;
        timers.arm();

        let stale = rx.recv().await.unwrap();
        assert!(!timers.is_current(&stale));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = rx.recv().await.unwrap();
        assert_eq!(fresh.phase, TimerPhase::Response);
        assert!(timers.is_current(&fresh));
    }
}
