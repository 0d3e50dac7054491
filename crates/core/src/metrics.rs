//! Consensus metrics.
//!
//! Domain-specific prometheus metrics; use traces for event-level
//! granularity during investigations.

use prometheus::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics for the consensus core.
pub struct Metrics {
    /// Rounds entered beyond round 0 (round-change rate).
    pub round_changes: Counter,
    /// Sequence advances (blocks finalized from this node's view).
    pub sequence_advances: Counter,
    /// Seconds from accepting a PRE-PREPARE to starting the next sequence.
    pub consensus_duration: Histogram,
    /// The sequence currently being agreed on.
    pub current_sequence: Gauge,
    /// The round currently being attempted.
    pub current_round: Gauge,
}

impl Metrics {
    fn new() -> Self {
        Self {
            round_changes: register_counter!(
                "istanbul_round_changes_total",
                "Rounds entered beyond round 0"
            )
            .expect("metric registration"),
            sequence_advances: register_counter!(
                "istanbul_sequence_advances_total",
                "Consensus sequence advances"
            )
            .expect("metric registration"),
            consensus_duration: register_histogram!(
                "istanbul_consensus_duration_seconds",
                "Time from accepted pre-prepare to sequence advance"
            )
            .expect("metric registration"),
            current_sequence: register_gauge!(
                "istanbul_current_sequence",
                "Sequence currently being agreed on"
            )
            .expect("metric registration"),
            current_round: register_gauge!(
                "istanbul_current_round",
                "Round currently being attempted"
            )
            .expect("metric registration"),
        }
    }
}

/// The process-global consensus metrics.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
