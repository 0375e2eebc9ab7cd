// Relay scoring: each hand-off is timed against the previous hand-off's own
// timestamp, tracked here rather than borrowed from anyone's touch state.

use log::{debug, info};

use crate::config::SyncConfig;
use crate::model::{Millis, PlayerId, RelayHandoff, RelayTiming};

#[derive(Clone, Debug, PartialEq)]
pub struct RelayChain {
    handoffs: Vec<RelayHandoff>,
    multiplier: f64,
    /// Reference time for the next hand-off's delta.
    last_handoff_at: Option<Millis>,
    /// Non-miss hand-offs since the chain last started.
    streak: u32,
}

impl Default for RelayChain {
    fn default() -> Self {
        Self { handoffs: Vec::new(), multiplier: 1.0, last_handoff_at: None, streak: 0 }
    }
}

impl RelayChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, timestamp: Millis, config: &SyncConfig) -> RelayTiming {
        let Some(previous) = self.last_handoff_at else {
            return RelayTiming::Good;
        };
        let delta = timestamp.saturating_sub(previous);
        if delta < config.relay_perfect_ms {
            RelayTiming::Perfect
        } else if delta < config.relay_good_ms {
            RelayTiming::Good
        } else {
            RelayTiming::Miss
        }
    }

    /// Scores and appends a hand-off. A hand-off stamped before the current
    /// reference time arrived late and is discarded (`None`).
    pub fn record(&mut self, from: PlayerId, to: PlayerId, timestamp: Millis, config: &SyncConfig) -> Option<RelayTiming> {
        if let Some(previous) = self.last_handoff_at {
            if timestamp < previous {
                debug!("stale relay hand-off {} -> {} at {} (reference {})", from, to, timestamp, previous);
                return None;
            }
        }
        let timing = self.classify(timestamp, config);
        match timing {
            RelayTiming::Perfect => {
                self.multiplier += config.perfect_bonus;
                self.streak += 1;
            }
            RelayTiming::Good => self.streak += 1,
            RelayTiming::Miss => {
                // The missed hand-off starts a fresh chain.
                self.reset();
            }
        }
        info!("relay {} -> {}: {:?}, multiplier {:.1}", from, to, timing, self.multiplier);
        self.handoffs.push(RelayHandoff { from, to, timestamp, timing });
        self.last_handoff_at = Some(timestamp);
        Some(timing)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn handoffs(&self) -> &[RelayHandoff] {
        &self.handoffs
    }

    pub fn last_handoff_at(&self) -> Option<Millis> {
        self.last_handoff_at
    }

    pub fn is_empty(&self) -> bool {
        self.handoffs.is_empty()
    }
}
