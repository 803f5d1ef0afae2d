use std::time::{Duration, Instant};

pub type ExponentialBackoff = backoff::exponential::ExponentialBackoff<ManualClock>;

#[derive(Debug)]
pub struct ManualClock {
    pub now: Instant,
}

impl backoff::Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now
    }
}

/// Retransmission backoff for one STUN transaction, per RFC 5389 §7.2.1:
/// the interval doubles from the initial RTO and is capped at
/// `max_interval`. Attempts are counted by the caller, so there is no
/// elapsed-time cutoff here.
pub fn new(now: Instant, initial_interval: Duration, max_interval: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: initial_interval,
        initial_interval,
        randomization_factor: 0.,
        multiplier: 2.,
        max_interval,
        start_time: now,
        max_elapsed_time: None,
        clock: ManualClock { now },
    }
}

/// The send times of a transaction started at `start` with the given RTO,
/// assuming no response ever arrives and the RTO stays under the cap.
#[cfg(test)]
pub fn steps(start: Instant, rto: Duration) -> [Instant; 7] {
    [
        start,
        start + rto,
        start + rto * 3,
        start + rto * 7,
        start + rto * 15,
        start + rto * 31,
        start + rto * 31 + crate::requests::MAX_RETRANSMIT_INTERVAL.min(rto * 32),
    ]
}
