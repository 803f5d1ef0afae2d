//! Receiving classification from inbound traffic.

use std::time::Instant;

use crate::config::ConnectionConfig;

/// Tracks whether anything — data, a check, or a check response — arrived on
/// the pair recently.
#[derive(Debug)]
pub struct ReceiveStateTracker {
    receiving: bool,
    unchanged_since: Instant,
}

impl ReceiveStateTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            receiving: false,
            unchanged_since: now,
        }
    }

    pub fn receiving(&self) -> bool {
        self.receiving
    }

    /// When the receiving flag last flipped.
    pub fn unchanged_since(&self) -> Instant {
        self.unchanged_since
    }

    /// Re-derives the flag and returns the new value if it flipped.
    pub fn update(
        &mut self,
        now: Instant,
        config: &ConnectionConfig,
        last_received: Option<Instant>,
    ) -> Option<bool> {
        let receiving = last_received
            .is_some_and(|last| now.saturating_duration_since(last) < config.receiving_timeout);

        if receiving == self.receiving {
            return None;
        }

        self.receiving = receiving;
        self.unchanged_since = now;
        Some(receiving)
    }

    /// Drops the flag without reporting a transition. Used when learned
    /// state is deliberately forgotten.
    pub fn forget(&mut self) {
        self.receiving = false;
    }
}
