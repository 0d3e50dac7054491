//! Consensus configuration.

use istanbul_types::ProposerPolicy;
use std::time::Duration;

/// Static parameters of the consensus core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base round timeout. Each round waits this long, plus the backoff
    /// component, before broadcasting a ROUND-CHANGE.
    pub request_timeout: Duration,
    /// Target block interval. Added to the round-0 timeout so the timer
    /// does not race the block producer.
    pub block_period: Duration,
    /// How the proposer rotates across rounds.
    pub proposer_policy: ProposerPolicy,
    /// Capacity of the event channel feeding the core's loop.
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(3),
            block_period: Duration::from_secs(5),
            proposer_policy: ProposerPolicy::RoundRobin,
            channel_capacity: 10_000,
        }
    }
}
