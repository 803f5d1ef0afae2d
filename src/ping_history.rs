//! Record of connectivity checks still waiting for a response.

use std::time::Instant;

use stun_codec::TransactionId;

/// Pings kept past this bound have long told their story; the oldest are
/// trimmed so a dead pair cannot grow the record without limit.
const MAX_TRACKED_PINGS: usize = 64;

/// One connectivity check that has been sent but not yet answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPing {
    pub id: TransactionId,
    pub sent_at: Instant,
    pub nomination: u32,
}

/// Ordered record of unanswered pings, cleared wholesale whenever any
/// response arrives.
#[derive(Debug, Default)]
pub struct PingHistory {
    pings: Vec<SentPing>,
}

impl PingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ping: SentPing) {
        if self.pings.len() == MAX_TRACKED_PINGS {
            self.pings.remove(0);
        }
        self.pings.push(ping);
    }

    /// Nomination value the given check carried, if it is still on record.
    pub fn nomination_for(&self, id: TransactionId) -> Option<u32> {
        self.pings
            .iter()
            .find(|ping| ping.id == id)
            .map(|ping| ping.nomination)
    }

    pub fn oldest_sent_at(&self) -> Option<Instant> {
        self.pings.first().map(|ping| ping.sent_at)
    }

    pub fn len(&self) -> usize {
        self.pings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pings.is_empty()
    }

    pub fn clear(&mut self) {
        self.pings.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &SentPing> + '_ {
        self.pings.iter()
    }
}
