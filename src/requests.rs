//! In-flight STUN transactions of one candidate pair.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use ::backoff::backoff::Backoff;
use stun_codec::{Message, TransactionId};

use crate::attributes::{self, Attribute};
use crate::backoff::{self, ExponentialBackoff};

/// Total transmissions of one request before it is given up on (RFC 5389
/// `Rc`).
pub(crate) const MAX_ATTEMPTS: u32 = 7;

/// Floor for the retransmission timeout of a fresh pair.
pub(crate) const MIN_RTO: Duration = Duration::from_millis(500);

/// Ceiling for the RTT-derived retransmission timeout.
pub(crate) const MAX_RTO: Duration = Duration::from_secs(3);

/// Ceiling for any single retransmission interval.
pub(crate) const MAX_RETRANSMIT_INTERVAL: Duration = Duration::from_secs(8);

/// One connectivity-check transaction: a Binding (or compact ping) request
/// together with its retransmission state.
#[derive(Debug)]
pub struct ConnectionRequest {
    message: Message<Attribute>,
    bytes: Vec<u8>,
    first_sent_at: Instant,
    next_attempt_at: Instant,
    attempts: u32,
    backoff: ExponentialBackoff,
}

impl ConnectionRequest {
    pub fn id(&self) -> TransactionId {
        self.message.transaction_id()
    }

    /// The request as sent, for recovering context when the response lands.
    pub fn message(&self) -> &Message<Attribute> {
        &self.message
    }

    pub fn is_goog_ping(&self) -> bool {
        self.message.method() == attributes::goog_ping()
    }

    /// Time since the first transmission.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_sent_at)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Owns the in-flight transactions of one connection: serialises requests,
/// schedules retransmissions with exponential backoff, matches responses by
/// transaction id and surfaces the transactions that ran out of attempts.
///
/// SANS-IO: encoded packets pile up in an internal buffer and are drained by
/// the connection via [`poll_transmit`](StunRequestManager::poll_transmit).
#[derive(Debug, Default)]
pub struct StunRequestManager {
    in_flight: HashMap<TransactionId, ConnectionRequest>,
    buffered_transmits: VecDeque<Vec<u8>>,
    rto: Option<Duration>,
}

impl StunRequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the initial retransmission timeout from the pair's RTT.
    pub fn set_rtt(&mut self, rtt: Duration) {
        self.rto = Some((rtt * 2).clamp(MIN_RTO, MAX_RTO));
    }

    /// Registers and buffers a new transaction.
    pub fn send(&mut self, message: Message<Attribute>, now: Instant) -> TransactionId {
        let id = message.transaction_id();
        let bytes = attributes::encode(message.clone());

        let mut backoff = backoff::new(now, self.rto.unwrap_or(MIN_RTO), MAX_RETRANSMIT_INTERVAL);
        let interval = backoff
            .next_backoff()
            .expect("backoff has no elapsed-time cutoff");

        self.buffered_transmits.push_back(bytes.clone());
        self.in_flight.insert(
            id,
            ConnectionRequest {
                message,
                bytes,
                first_sent_at: now,
                next_attempt_at: now + interval,
                attempts: 1,
                backoff,
            },
        );

        id
    }

    /// Takes the transaction a response belongs to. Returns `None` for
    /// responses that match nothing, which are to be ignored.
    pub fn handle_response(&mut self, id: TransactionId) -> Option<ConnectionRequest> {
        self.in_flight.remove(&id)
    }

    pub fn get(&self, id: TransactionId) -> Option<&ConnectionRequest> {
        self.in_flight.get(&id)
    }

    /// Retransmits every due transaction and returns the ones whose
    /// attempts are exhausted.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<ConnectionRequest> {
        let mut timed_out = Vec::new();

        let due: Vec<TransactionId> = self
            .in_flight
            .iter()
            .filter(|(_, request)| request.next_attempt_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let request = self
                .in_flight
                .get_mut(&id)
                .expect("id is from the in-flight set");

            if request.attempts >= MAX_ATTEMPTS {
                timed_out.push(self.in_flight.remove(&id).expect("present"));
                continue;
            }

            tracing::debug!(?id, attempts = request.attempts, "Retransmitting request");

            request.attempts += 1;
            request.backoff.clock.now = now;
            let interval = request
                .backoff
                .next_backoff()
                .expect("backoff has no elapsed-time cutoff");
            request.next_attempt_at = now + interval;

            self.buffered_transmits.push_back(request.bytes.clone());
        }

        timed_out
    }

    /// The next instant at which [`handle_timeout`](Self::handle_timeout)
    /// has work to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.in_flight
            .values()
            .map(|request| request.next_attempt_at)
            .min()
    }

    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.buffered_transmits.pop_front()
    }

    /// Drops all transactions without callbacks; used during shutdown.
    pub fn cancel_all(&mut self) {
        self.in_flight.clear();
        self.buffered_transmits.clear();
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stun_codec::rfc5389::methods::BINDING;
    use stun_codec::MessageClass;

    fn binding_request() -> Message<Attribute> {
        Message::new(
            MessageClass::Request,
            BINDING,
            attributes::transaction_id(),
        )
    }

    #[test]
    fn send_buffers_exactly_one_transmit() {
        let now = Instant::now();
        let mut manager = StunRequestManager::new();

        manager.send(binding_request(), now);

        assert!(manager.poll_transmit().is_some());
        assert!(manager.poll_transmit().is_none());
    }

    #[test]
    fn retransmits_follow_the_backoff_schedule_then_time_out() {
        let start = Instant::now();
        let mut manager = StunRequestManager::new();

        let id = manager.send(binding_request(), start);
        assert!(manager.poll_transmit().is_some());

        let sends = crate::backoff::steps(start, MIN_RTO);

        for expected in &sends[1..] {
            assert_eq!(manager.poll_timeout(), Some(*expected));

            // Nothing happens before the deadline.
            assert!(manager
                .handle_timeout(*expected - Duration::from_millis(1))
                .is_empty());
            assert!(manager.poll_transmit().is_none());

            assert!(manager.handle_timeout(*expected).is_empty());
            assert!(manager.poll_transmit().is_some());
            assert!(manager.poll_transmit().is_none());
        }

        // Seven transmissions done; the final wait expires the transaction.
        let deadline = manager.poll_timeout().unwrap();
        let timed_out = manager.handle_timeout(deadline);

        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].id(), id);
        assert_eq!(timed_out[0].attempts(), MAX_ATTEMPTS);
        assert!(manager.poll_transmit().is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn responses_match_by_transaction_id_only() {
        let now = Instant::now();
        let mut manager = StunRequestManager::new();

        let id = manager.send(binding_request(), now);

        assert!(manager
            .handle_response(TransactionId::new([0xFF; 12]))
            .is_none());
        assert!(manager.handle_response(id).is_some());
        assert!(manager.handle_response(id).is_none());
    }

    #[test]
    fn a_larger_rtt_stretches_the_first_retransmit() {
        let now = Instant::now();
        let mut manager = StunRequestManager::new();
        manager.set_rtt(Duration::from_secs(1));

        manager.send(binding_request(), now);

        assert_eq!(manager.poll_timeout(), Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn the_rto_never_drops_below_the_floor() {
        let now = Instant::now();
        let mut manager = StunRequestManager::new();
        manager.set_rtt(Duration::from_millis(10));

        manager.send(binding_request(), now);

        assert_eq!(manager.poll_timeout(), Some(now + MIN_RTO));
    }

    #[test]
    fn cancel_all_silently_drops_everything() {
        let now = Instant::now();
        let mut manager = StunRequestManager::new();

        manager.send(binding_request(), now);
        manager.send(binding_request(), now);
        assert_eq!(manager.len(), 2);

        manager.cancel_all();

        assert!(manager.is_empty());
        assert!(manager.poll_transmit().is_none());
        assert_eq!(manager.poll_timeout(), None);
    }
}
