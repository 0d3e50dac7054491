//! Timer management for the consensus core.
//!
//! Timers never invoke handlers directly: each one is a tokio task that
//! sleeps and then posts an event into the core's queue, so every timeout
//! is serialized with message handling.

use crate::config::Config;
use crate::events::CoreEvent;
use istanbul_types::View;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// The round timeout backoff is capped at 2^5 = 32 seconds.
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Compute the round-change timeout for `round`.
///
/// Round 0 waits `request_timeout + block_period` so the timer does not
/// race normal block production; later rounds add an exponential backoff of
/// `2^min(round, 5)` seconds instead.
pub fn round_change_timeout(config: &Config, round: u64) -> Duration {
    let backoff = if round == 0 {
        config.block_period
    } else {
        let exponent = (round as u32).min(MAX_BACKOFF_EXPONENT);
        Duration::from_secs(2u64.pow(exponent))
    };
    config.request_timeout + backoff
}

/// Identifies the core's two timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Per-round progress timeout; fires a `Timeout { view }` event.
    RoundChange,
    /// One-shot retry for a PRE-PREPARE whose block timestamp is still in
    /// the future; re-posts the original payload.
    FuturePreprepare,
}

/// Owns the core's timer tasks.
///
/// Setting a timer replaces any live timer with the same id. Dropping the
/// manager cancels everything.
pub(crate) struct TimerManager {
    timers: HashMap<TimerId, JoinHandle<()>>,
    event_tx: mpsc::Sender<CoreEvent>,
}

impl TimerManager {
    pub(crate) fn new(event_tx: mpsc::Sender<CoreEvent>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Arm the round-change timer for `view`.
    pub(crate) fn set_round_change_timer(&mut self, view: View, duration: Duration) {
        debug!(view = %view, ?duration, "Round change timer set");
        self.set(TimerId::RoundChange, duration, CoreEvent::Timeout { view });
    }

    /// Schedule a PRE-PREPARE payload to be re-handled after `duration`.
    pub(crate) fn set_future_preprepare_timer(&mut self, payload: Vec<u8>, duration: Duration) {
        debug!(?duration, "Future pre-prepare timer set");
        self.set(
            TimerId::FuturePreprepare,
            duration,
            CoreEvent::MessageReceived { payload },
        );
    }

    fn set(&mut self, id: TimerId, duration: Duration, event: CoreEvent) {
        self.cancel(id);
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, "Timer fired");
            let _ = event_tx.send(event).await;
        });
        self.timers.insert(id, handle);
    }

    /// Cancel one timer. No-op if it does not exist or already fired.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            trace!(?id, "Timer cancelled");
        }
    }

    /// Cancel every timer. Called on round resets and shutdown.
    pub(crate) fn cancel_all(&mut self) {
        for (id, handle) in self.timers.drain() {
            handle.abort();
            trace!(?id, "Timer cancelled");
        }
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule() {
        let config = Config {
            request_timeout: Duration::from_secs(3),
            block_period: Duration::from_secs(5),
            ..Config::default()
        };

        // Round 0 adds the block period.
        assert_eq!(
            round_change_timeout(&config, 0),
            Duration::from_secs(3 + 5)
        );

        // Rounds above 0 add 2^round seconds.
        assert_eq!(round_change_timeout(&config, 1), Duration::from_secs(3 + 2));
        assert_eq!(round_change_timeout(&config, 2), Duration::from_secs(3 + 4));
        assert_eq!(
            round_change_timeout(&config, 5),
            Duration::from_secs(3 + 32)
        );

        // Capped at 2^5.
        assert_eq!(
            round_change_timeout(&config, 9),
            Duration::from_secs(3 + 32)
        );
    }

    #[tokio::test]
    async fn timer_fires_with_its_view() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerManager::new(tx);
        let view = View::new(1, 2);

        timers.set_round_change_timer(view, Duration::from_millis(10));
        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");

        match event {
            CoreEvent::Timeout { view: fired } => assert_eq!(fired, view),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn replacing_a_timer_cancels_the_old_one() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerManager::new(tx);

        timers.set_round_change_timer(View::new(1, 0), Duration::from_secs(60));
        timers.set_round_change_timer(View::new(1, 1), Duration::from_millis(10));
        assert_eq!(timers.active_count(), 1);

        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("replacement timer should fire")
            .expect("channel open");
        match event {
            CoreEvent::Timeout { view } => assert_eq!(view, View::new(1, 1)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_all_stops_timers() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timers = TimerManager::new(tx);

        timers.set_round_change_timer(View::new(1, 0), Duration::from_millis(10));
        timers.set_future_preprepare_timer(vec![1, 2, 3], Duration::from_millis(10));
        assert_eq!(timers.active_count(), 2);

        timers.cancel_all();
        assert_eq!(timers.active_count(), 0);
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "no timer should have fired");
    }
}
