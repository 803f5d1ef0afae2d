//! One directed candidate pair and the checks that keep it alive.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use stun_codec::rfc5389::attributes::{
    ErrorCode, Fingerprint, MessageIntegrity, Username, XorMappedAddress,
};
use stun_codec::rfc5389::errors::{ServerError, Unauthorized, UnknownAttribute};
use stun_codec::rfc5389::methods::BINDING;
use stun_codec::{Message, MessageClass, Method, TransactionId};

use crate::attributes::{
    self, Attribute, DtlsInStun, DtlsInStunAck, GoogDelta, GoogDeltaAck, GoogMiscInfo,
    GoogNetworkInfo, IceControlled, IceControlling, MessageIntegrity32, Nomination, Priority,
    RoleConflict, UseCandidate, GOOG_PING_VERSION,
};
use crate::candidate::{pair_priority, Candidate, CandidateKind, IceParameters, IceRole, Protocol};
use crate::config::{self, ConnectionConfig};
use crate::nomination::NominationTracker;
use crate::ping_history::{PingHistory, SentPing};
use crate::piggyback::{DtlsPiggybackCallbacks, GoogDeltaAckConsumer, GoogDeltaConsumer};
use crate::port::{Port, SendError};
use crate::publisher::{Publisher, SubscriptionId};
use crate::rate::RateTracker;
use crate::receiving::ReceiveStateTracker;
use crate::requests::StunRequestManager;
use crate::rtt::EventBasedEma;
use crate::stats::ConnectionStats;
use crate::write_state::{WriteState, WriteStateTracker};

/// RTT assumed before the first sample arrives.
const DEFAULT_RTT: Duration = Duration::from_secs(3);

/// Half-life of the event-based RTT estimate.
const RTT_ESTIMATE_HALF_LIFE: Duration = Duration::from_millis(500);

/// Samples after which the scalar RTT estimate counts as settled.
const RTT_CONVERGENCE_SAMPLES: u64 = 4;

static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Process-wide unique identifier of a connection, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u32);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// ICE candidate pair state, RFC 5245 §5.7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePairState {
    Waiting,
    InProgress,
    Succeeded,
    Failed,
}

struct Signals {
    state_change: Publisher<ConnectionId>,
    ready_to_send: Publisher<ConnectionId>,
    nominated: Publisher<ConnectionId>,
    destroyed: Publisher<ConnectionId>,
}

impl Signals {
    fn new() -> Self {
        Self {
            state_change: Publisher::new(),
            ready_to_send: Publisher::new(),
            nominated: Publisher::new(),
            destroyed: Publisher::new(),
        }
    }
}

type ReceivedPacketCallback = Box<dyn FnMut(ConnectionId, &[u8], Instant)>;
type RoleConflictCallback = Box<dyn FnMut(IceRole)>;

/// A communication link between a local and a remote candidate.
///
/// The connection is SANS-IO and single-threaded: it neither reads the clock
/// nor touches the network. All calls happen on the owning channel's network
/// sequence, time is passed in explicitly, outbound packets go through the
/// weakly-held [`Port`], and retransmission timers are driven by the owner
/// via [`poll_timeout`](Connection::poll_timeout) /
/// [`handle_timeout`](Connection::handle_timeout).
pub struct Connection {
    id: ConnectionId,
    port: Option<Weak<dyn Port>>,
    local: Candidate,
    remote: Candidate,
    role: IceRole,
    tie_breaker: u64,
    config: ConnectionConfig,
    created_at: Instant,

    state: CandidatePairState,
    connected: bool,
    pruned: bool,
    selected: bool,
    use_candidate_attr: bool,
    remote_renomination: bool,

    requests: StunRequestManager,
    ping_history: PingHistory,
    write_state: WriteStateTracker,
    receive_state: ReceiveStateTracker,
    nominations: NominationTracker,

    rtt: Duration,
    rtt_samples: u64,
    rtt_estimate: EventBasedEma,

    last_ping_sent: Option<Instant>,
    last_ping_received: Option<Instant>,
    last_ping_response_received: Option<Instant>,
    last_data_received: Option<Instant>,
    last_send_data: Option<Instant>,
    last_ping_id_received: Option<TransactionId>,
    num_pings_sent: u64,

    remote_support_goog_ping: Option<bool>,
    cached_stun_binding: Option<Vec<u8>>,

    send_rate: RateTracker,
    recv_rate: RateTracker,
    stats: ConnectionStats,
    last_send_error: Option<SendError>,
    send_errors_since_last_response: usize,

    signals: Signals,
    received_packet_callback: Option<ReceivedPacketCallback>,
    role_conflict_callback: Option<RoleConflictCallback>,
    dtls_piggyback: Option<DtlsPiggybackCallbacks>,
    goog_delta_consumer: Option<GoogDeltaConsumer>,
    goog_delta_ack_consumer: Option<GoogDeltaAckConsumer>,
}

impl Connection {
    /// Creates a pair over UDP; such a pair is connected from the start.
    pub fn new_udp(
        config: ConnectionConfig,
        port: Weak<dyn Port>,
        local: Candidate,
        remote: Candidate,
        role: IceRole,
        tie_breaker: u64,
        now: Instant,
    ) -> Self {
        Self::new(config, port, local, remote, role, tie_breaker, true, now)
    }

    /// Creates a pair over TCP; it only becomes connected once the owner
    /// reports the stream as established via
    /// [`set_connected`](Connection::set_connected).
    pub fn new_tcp(
        config: ConnectionConfig,
        port: Weak<dyn Port>,
        local: Candidate,
        remote: Candidate,
        role: IceRole,
        tie_breaker: u64,
        now: Instant,
    ) -> Self {
        Self::new(config, port, local, remote, role, tie_breaker, false, now)
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        config: ConnectionConfig,
        port: Weak<dyn Port>,
        local: Candidate,
        remote: Candidate,
        role: IceRole,
        tie_breaker: u64,
        connected: bool,
        now: Instant,
    ) -> Self {
        let id = ConnectionId::next();

        tracing::debug!(%id, %local, %remote, ?role, "Creating connection");

        Self {
            id,
            port: Some(port),
            local,
            remote,
            role,
            tie_breaker,
            config,
            created_at: now,
            state: CandidatePairState::Waiting,
            connected,
            pruned: false,
            selected: false,
            use_candidate_attr: true,
            remote_renomination: false,
            requests: StunRequestManager::new(),
            ping_history: PingHistory::new(),
            write_state: WriteStateTracker::new(now),
            receive_state: ReceiveStateTracker::new(now),
            nominations: NominationTracker::new(),
            rtt: DEFAULT_RTT,
            rtt_samples: 0,
            rtt_estimate: EventBasedEma::new(RTT_ESTIMATE_HALF_LIFE),
            last_ping_sent: None,
            last_ping_received: None,
            last_ping_response_received: None,
            last_data_received: None,
            last_send_data: None,
            last_ping_id_received: None,
            num_pings_sent: 0,
            remote_support_goog_ping: None,
            cached_stun_binding: None,
            send_rate: RateTracker::new(),
            recv_rate: RateTracker::new(),
            stats: ConnectionStats::default(),
            last_send_error: None,
            send_errors_since_last_response: 0,
            signals: Signals::new(),
            received_packet_callback: None,
            role_conflict_callback: None,
            dtls_piggyback: None,
            goog_delta_consumer: None,
            goog_delta_ack_consumer: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_candidate(&self) -> &Candidate {
        &self.local
    }

    pub fn remote_candidate(&self) -> &Candidate {
        &self.remote
    }

    pub fn role(&self) -> IceRole {
        self.role
    }

    /// RFC 5245 §5.7.2 pair priority under the current role.
    pub fn priority(&self) -> u64 {
        pair_priority(self.role, self.local.priority(), self.remote.priority())
    }

    /// Generation of the remote candidate; the pair belongs to that ICE
    /// generation.
    pub fn generation(&self) -> u32 {
        self.remote.generation()
    }

    /// Combined cost of the networks on both ends.
    pub fn network_cost(&self) -> u32 {
        u32::from(self.local.network_cost()) + u32::from(self.remote.network_cost())
    }

    pub fn write_state(&self) -> WriteState {
        self.write_state.state()
    }

    pub fn writable(&self) -> bool {
        self.write_state.state() == WriteState::Writable
    }

    pub fn receiving(&self) -> bool {
        self.receive_state.receiving()
    }

    /// A pair is weak while its liveness is not confirmed in both
    /// directions.
    pub fn weak(&self) -> bool {
        !(self.writable() && self.receiving())
    }

    /// Whether the pair is still worth checking.
    pub fn active(&self) -> bool {
        self.write_state.state() != WriteState::WriteTimeout
    }

    /// Whether the transport below the pair has finished connecting. Only
    /// ever false for TCP pairs.
    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn pruned(&self) -> bool {
        self.pruned
    }

    pub fn selected(&self) -> bool {
        self.selected
    }

    /// Label set by the owning channel for its selected pair; informational
    /// only.
    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    /// True once [`shutdown`](Connection::shutdown) ran or the owning port
    /// disappeared; every further operation is a no-op.
    pub fn pending_delete(&self) -> bool {
        self.upgraded_port().is_none()
    }

    pub fn state(&self) -> CandidatePairState {
        self.state
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn rtt_samples(&self) -> u64 {
        self.rtt_samples
    }

    /// The event-based moving average over RTT samples.
    pub fn rtt_estimate(&self) -> &EventBasedEma {
        &self.rtt_estimate
    }

    /// RFC 5245 §4.1.2.1: the priority a peer-reflexive candidate learned
    /// from our checks would get.
    pub fn prflx_priority(&self) -> u32 {
        let type_preference: u32 = match self.local.protocol() {
            Protocol::Udp => 110,
            Protocol::Tcp => 80,
        };

        (type_preference << 24) | (self.local.priority() & 0x00FF_FFFF)
    }

    pub fn nominated(&self) -> bool {
        self.nominations.nominated()
    }

    pub fn nomination(&self) -> u32 {
        self.nominations.nomination()
    }

    pub fn acked_nomination(&self) -> u32 {
        self.nominations.acked_nomination()
    }

    pub fn remote_nomination(&self) -> u32 {
        self.nominations.remote_nomination()
    }

    pub fn use_candidate_attr(&self) -> bool {
        self.use_candidate_attr
    }

    /// Whether USE-CANDIDATE is attached to nominating checks. Defaults to
    /// true; the channel clears it against ice-lite peers until this pair
    /// becomes their best one.
    pub fn set_use_candidate_attr(&mut self, enable: bool) {
        self.use_candidate_attr = enable;
    }

    /// Controlling side's nomination intent for this pair.
    pub fn set_nomination(&mut self, value: u32) {
        self.nominations.set_nomination(value);
    }

    pub fn last_ping_sent(&self) -> Option<Instant> {
        self.last_ping_sent
    }

    pub fn last_ping_received(&self) -> Option<Instant> {
        self.last_ping_received
    }

    pub fn last_ping_response_received(&self) -> Option<Instant> {
        self.last_ping_response_received
    }

    pub fn last_data_received(&self) -> Option<Instant> {
        self.last_data_received
    }

    pub fn last_send_data(&self) -> Option<Instant> {
        self.last_send_data
    }

    /// Transaction id of the most recent inbound check, for piggyback
    /// acknowledgements.
    pub fn last_ping_id_received(&self) -> Option<TransactionId> {
        self.last_ping_id_received
    }

    /// When any data, check or check response last arrived.
    pub fn last_received(&self) -> Option<Instant> {
        [
            self.last_ping_received,
            self.last_data_received,
            self.last_ping_response_received,
        ]
        .into_iter()
        .flatten()
        .max()
    }

    /// When the receiving flag last flipped.
    pub fn receiving_unchanged_since(&self) -> Instant {
        self.receive_state.unchanged_since()
    }

    pub fn num_pings_sent(&self) -> u64 {
        self.num_pings_sent
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Outbound data rate in bytes per second over the recent window.
    pub fn send_rate(&self, now: Instant) -> f64 {
        self.send_rate.rate(now)
    }

    /// Inbound rate in bytes per second over the recent window.
    pub fn recv_rate(&self, now: Instant) -> f64 {
        self.recv_rate.rate(now)
    }

    /// The most recent error returned by the transport.
    pub fn last_send_error(&self) -> Option<&SendError> {
        self.last_send_error.as_ref()
    }

    /// A pair can be deleted once it has been silent for the dead-receive
    /// timeout, or never produced anything within its minimum lifetime.
    pub fn dead(&self, now: Instant) -> bool {
        if let Some(last_received) = self.last_received() {
            return now.saturating_duration_since(last_received) >= self.config.dead_receive_timeout;
        }

        if self.active() {
            return now.saturating_duration_since(self.created_at) >= self.config.min_lifetime;
        }

        true
    }

    pub fn rtt_converged(&self) -> bool {
        self.rtt_samples > RTT_CONVERGENCE_SAMPLES
    }

    /// Whether responses that should have arrived by now are missing: the
    /// oldest unanswered check is older than twice the RTT.
    pub fn missing_responses(&self, now: Instant) -> bool {
        let Some(oldest) = self.ping_history.oldest_sent_at() else {
            return false;
        };

        now.saturating_duration_since(oldest) > self.rtt * 2
    }

    /// A stable pair is writable, has a settled RTT estimate and no overdue
    /// responses; the channel pings it at a slower cadence.
    pub fn stable(&self, now: Instant) -> bool {
        self.writable() && self.rtt_converged() && !self.missing_responses(now)
    }

    /// The checks sent since the last response, oldest first.
    pub fn pings_since_last_response(&self) -> impl Iterator<Item = &SentPing> + '_ {
        self.ping_history.iter()
    }

    /// Whether the configured cap of unanswered checks is reached.
    pub fn too_many_outstanding_pings(&self) -> bool {
        self.config
            .max_outstanding_pings
            .is_some_and(|max| self.ping_history.len() >= max)
    }

    pub fn subscribe_state_change(
        &self,
        callback: impl FnMut(&ConnectionId) + 'static,
    ) -> SubscriptionId {
        self.signals.state_change.subscribe(callback)
    }

    pub fn unsubscribe_state_change(&self, id: SubscriptionId) -> bool {
        self.signals.state_change.unsubscribe(id)
    }

    pub fn subscribe_ready_to_send(
        &self,
        callback: impl FnMut(&ConnectionId) + 'static,
    ) -> SubscriptionId {
        self.signals.ready_to_send.subscribe(callback)
    }

    pub fn subscribe_nominated(
        &self,
        callback: impl FnMut(&ConnectionId) + 'static,
    ) -> SubscriptionId {
        self.signals.nominated.subscribe(callback)
    }

    pub fn subscribe_destroyed(
        &self,
        callback: impl FnMut(&ConnectionId) + 'static,
    ) -> SubscriptionId {
        self.signals.destroyed.subscribe(callback)
    }

    pub fn unsubscribe_destroyed(&self, id: SubscriptionId) -> bool {
        self.signals.destroyed.unsubscribe(id)
    }

    /// Registers the recipient of data packets. There can only be one.
    pub fn register_received_packet_callback(
        &mut self,
        callback: impl FnMut(ConnectionId, &[u8], Instant) + 'static,
    ) {
        self.received_packet_callback = Some(Box::new(callback));
    }

    pub fn deregister_received_packet_callback(&mut self) {
        self.received_packet_callback = None;
    }

    /// Registers the channel's role-conflict handler; invoked with the role
    /// this connection switched to.
    pub fn set_role_conflict_callback(&mut self, callback: impl FnMut(IceRole) + 'static) {
        self.role_conflict_callback = Some(Box::new(callback));
    }

    pub fn register_dtls_piggyback(&mut self, callbacks: DtlsPiggybackCallbacks) {
        self.dtls_piggyback = Some(callbacks);
    }

    pub fn deregister_dtls_piggyback(&mut self) {
        self.dtls_piggyback = None;
    }

    pub fn set_goog_delta_consumers(
        &mut self,
        delta: GoogDeltaConsumer,
        delta_ack: GoogDeltaAckConsumer,
    ) {
        self.goog_delta_consumer = Some(delta);
        self.goog_delta_ack_consumer = Some(delta_ack);
    }

    pub fn clear_goog_delta_consumers(&mut self) {
        self.goog_delta_consumer = None;
        self.goog_delta_ack_consumer = None;
    }

    /// Replaces the extension knobs wholesale.
    pub fn set_config(&mut self, config: ConnectionConfig) {
        self.config = config;
    }

    pub fn set_receiving_timeout(&mut self, timeout: Option<Duration>) {
        self.config.receiving_timeout = timeout.unwrap_or(config::RECEIVING_TIMEOUT);
    }

    pub fn set_unwritable_timeout(&mut self, timeout: Option<Duration>) {
        self.config.unwritable_timeout = timeout.unwrap_or(config::UNWRITABLE_TIMEOUT);
    }

    pub fn set_unwritable_min_checks(&mut self, checks: Option<usize>) {
        self.config.unwritable_min_checks = checks.unwrap_or(config::UNWRITABLE_MIN_CHECKS);
    }

    pub fn set_inactive_timeout(&mut self, timeout: Option<Duration>) {
        self.config.inactive_timeout = timeout.unwrap_or(config::INACTIVE_TIMEOUT);
    }

    /// Updates the credentials our side answers checks with, e.g. after an
    /// ICE restart.
    pub fn update_local_ice_parameters(&mut self, params: &IceParameters) {
        self.local.set_ufrag(params.ufrag.clone());
        self.local.set_password(params.password.clone());
    }

    /// Fills in the remote password and generation once signalling catches
    /// up with a peer-reflexive remote, matching by ufrag.
    pub fn maybe_set_remote_ice_parameters_and_generation(
        &mut self,
        params: &IceParameters,
        generation: u32,
    ) {
        if self.remote.ufrag() != params.ufrag {
            return;
        }

        if self.remote.password().is_empty() {
            self.remote.set_password(params.password.clone());
        }
        self.remote.set_generation(generation);
        self.remote_renomination = params.renomination;
    }

    /// Replaces a peer-reflexive remote candidate with the equivalent one
    /// received over signalling, keeping the better type and priority.
    pub fn maybe_update_peer_reflexive_candidate(&mut self, new_candidate: &Candidate) {
        if self.remote.kind() != CandidateKind::PeerReflexive
            || new_candidate.kind() == CandidateKind::PeerReflexive
        {
            return;
        }

        let equivalent = self.remote.addr() == new_candidate.addr()
            && self.remote.protocol() == new_candidate.protocol()
            && self.remote.generation() == new_candidate.generation()
            && self.remote.ufrag() == new_candidate.ufrag();

        if !equivalent {
            return;
        }

        tracing::info!(old = %self.remote, new = %new_candidate, "Upgrading peer-reflexive remote candidate");
        self.remote = new_candidate.clone();
    }

    /// Called by the port when the cost of the local network changes.
    pub fn set_local_candidate_network_cost(&mut self, cost: u16) {
        if cost == self.local.network_cost() {
            return;
        }

        self.local.set_network_cost(cost);
        self.signals.state_change.publish(&self.id);
    }

    /// Reports the TCP stream as (dis)connected.
    pub fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }

        tracing::debug!(conn = %self.id, connected, "Transport connectivity changed");
        self.connected = connected;
        self.signals.state_change.publish(&self.id);
    }

    /// Sends one connectivity check, optionally carrying a `GOOG-DELTA`
    /// payload. Only the owning channel initiates checks.
    pub fn ping(&mut self, now: Instant, delta: Option<Vec<u8>>) {
        if self.pending_delete() {
            return;
        }

        let body = self.build_ping_request(delta);
        let message = if self.should_send_goog_ping(&body) {
            let mut message = Message::new(
                MessageClass::Request,
                attributes::goog_ping(),
                attributes::transaction_id(),
            );
            let integrity =
                MessageIntegrity32::new_short_term_credential(&message, self.remote.password());
            message.add_attribute(integrity);
            message
        } else {
            self.finalize_stun_message(body)
        };

        let id = message.transaction_id();
        tracing::debug!(conn = %self.id, ?id, nomination = self.nominations.nomination(), "Sending connectivity check");

        self.ping_history.push(SentPing {
            id,
            sent_at: now,
            nomination: self.nominations.nomination(),
        });

        self.stats.ping_requests_total += 1;
        if self.last_ping_response_received.is_none() {
            self.stats.ping_requests_before_first_response += 1;
        }

        if self.rtt_samples > 0 {
            self.requests.set_rtt(self.rtt);
        }
        self.requests.send(message, now);
        self.flush_stun_transmits();

        self.last_ping_sent = Some(now);
        self.num_pings_sent += 1;

        if self.state == CandidatePairState::Waiting {
            self.set_state(CandidatePairState::InProgress);
        }
    }

    /// Re-derives write and receive state against the current time.
    pub fn update_state(&mut self, now: Instant) {
        if self.pending_delete() {
            return;
        }

        self.reclassify_write_state(now);
        self.update_receiving(now);
    }

    /// The next instant retransmission work is due.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.requests.poll_timeout()
    }

    /// Retransmits due checks and concludes the ones that ran out of
    /// attempts.
    pub fn handle_timeout(&mut self, now: Instant) {
        if self.pending_delete() {
            return;
        }

        let timed_out = self.requests.handle_timeout(now);
        self.flush_stun_transmits();

        for request in timed_out {
            tracing::debug!(conn = %self.id, id = ?request.id(), attempts = request.attempts(), "Connectivity check timed out");
        }

        self.reclassify_write_state(now);
    }

    /// Feeds one packet received on this pair, STUN or data.
    pub fn on_read_packet(&mut self, packet: &[u8], now: Instant) {
        if self.pending_delete() || packet.is_empty() {
            return;
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += packet.len() as u64;
        self.recv_rate.record(now, packet.len() as u64);

        // The two most significant bits of a STUN message are zero.
        if packet[0] & 0xC0 == 0 {
            match attributes::decode(packet) {
                Ok(Ok(message)) => self.on_stun_message(&message, now),
                _ => tracing::debug!(conn = %self.id, "Dropping undecodable STUN packet"),
            }
            return;
        }

        self.on_data_packet(packet, now);
    }

    /// Called when the underlying socket can take more data.
    pub fn on_ready_to_send(&mut self) {
        self.signals.ready_to_send.publish(&self.id);
    }

    /// Sends a data packet to the remote candidate.
    pub fn send(&mut self, data: &[u8], now: Instant) -> Result<usize, SendError> {
        if !self.connected {
            self.last_send_error = Some(SendError::NotConnected);
            return Err(SendError::NotConnected);
        }

        let Some(port) = self.upgraded_port() else {
            self.last_send_error = Some(SendError::PortGone);
            return Err(SendError::PortGone);
        };

        self.last_send_data = Some(now);

        match port.send_to(data, self.remote.addr()) {
            Ok(sent) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += sent as u64;
                self.send_rate.record(now, sent as u64);
                Ok(sent)
            }
            Err(error) => {
                self.stats.send_errors += 1;
                self.last_send_error = Some(error.clone());
                self.send_errors_since_last_response += 1;
                self.reclassify_write_state(now);
                Err(error)
            }
        }
    }

    /// Stops the channel from scheduling further checks on this pair;
    /// inbound packets are still accepted.
    pub fn prune(&mut self) {
        if self.pruned {
            return;
        }

        tracing::debug!(conn = %self.id, "Pruned");
        self.pruned = true;
    }

    /// Marks the pair failed and prunes it.
    pub fn fail_and_prune(&mut self) {
        if self.pending_delete() {
            return;
        }

        self.set_state(CandidatePairState::Failed);
        self.prune();
    }

    /// Resets the pair to the state of a freshly connected one: write state
    /// back to init, not receiving, in-flight checks dropped, RTT and
    /// learned nominations forgotten. Connectedness, candidates and
    /// statistics stay, and no state-change is signalled.
    pub fn forget_learned_state(&mut self) {
        tracing::debug!(conn = %self.id, "Forgetting learned state");

        self.write_state.set(WriteState::WriteInit);
        self.receive_state.forget();
        self.requests.cancel_all();
        self.ping_history.clear();
        self.send_errors_since_last_response = 0;
        self.nominations.forget();
        self.rtt = DEFAULT_RTT;
        self.rtt_samples = 0;
        self.rtt_estimate.reset();
        self.stats.current_round_trip_time = None;
        self.last_ping_response_received = None;
    }

    /// Releases the port and announces destruction. Returns false if that
    /// already happened.
    pub fn shutdown(&mut self) -> bool {
        if self.port.take().is_none() {
            return false;
        }

        tracing::debug!(conn = %self.id, "Shutting down");
        self.requests.cancel_all();
        self.signals.destroyed.publish(&self.id);

        true
    }

    /// Shuts down and asks the owning port to deallocate this connection.
    pub fn destroy(&mut self) {
        let port = self.upgraded_port();

        if self.shutdown() {
            if let Some(port) = port {
                port.destroy_connection(self.id);
            }
        }
    }

    fn upgraded_port(&self) -> Option<Rc<dyn Port>> {
        self.port.as_ref()?.upgrade()
    }

    fn set_state(&mut self, state: CandidatePairState) {
        if self.state == state {
            return;
        }

        tracing::debug!(conn = %self.id, from = ?self.state, to = ?state, "Pair state changed");
        self.state = state;
    }

    fn reclassify_write_state(&mut self, now: Instant) {
        // Transport send failures count against writability like unanswered
        // checks do.
        let failures = self.ping_history.len() + self.send_errors_since_last_response;

        let transition = self.write_state.classify(
            now,
            &self.config,
            failures,
            self.last_ping_response_received,
        );

        if let Some((from, to)) = transition {
            tracing::info!(conn = %self.id, ?from, ?to, "Write state changed");
            self.signals.state_change.publish(&self.id);
        }
    }

    fn update_receiving(&mut self, now: Instant) {
        let transition = self
            .receive_state
            .update(now, &self.config, self.last_received());

        if let Some(receiving) = transition {
            tracing::debug!(conn = %self.id, receiving, "Receiving state changed");
            self.signals.state_change.publish(&self.id);
        }
    }

    fn build_ping_request(&mut self, delta: Option<Vec<u8>>) -> Message<Attribute> {
        let mut message = Message::new(
            MessageClass::Request,
            BINDING,
            attributes::transaction_id(),
        );

        message.add_attribute(
            Username::new(format!("{}:{}", self.remote.ufrag(), self.local.ufrag()))
                .expect("ufrag pair fits in USERNAME"),
        );
        message.add_attribute(GoogNetworkInfo::new(
            self.local.network_id(),
            self.local.network_cost(),
        ));

        match self.role {
            IceRole::Controlling => {
                message.add_attribute(IceControlling::new(self.tie_breaker));

                let nomination = self.nominations.nomination();
                if nomination > 0
                    && (self.use_candidate_attr
                        || nomination != self.nominations.acked_nomination())
                {
                    message.add_attribute(UseCandidate::new());
                }
                if self.remote_renomination && nomination > 0 {
                    message.add_attribute(Nomination::new(nomination));
                }
            }
            IceRole::Controlled => {
                message.add_attribute(IceControlled::new(self.tie_breaker));
            }
        }

        message.add_attribute(Priority::new(self.prflx_priority()));

        if self.config.enable_goog_ping && self.remote_support_goog_ping.is_none() {
            message.add_attribute(GoogMiscInfo::new(vec![GOOG_PING_VERSION]));
        }

        if let Some(delta) = delta {
            message.add_attribute(GoogDelta::new(delta));
        }

        self.fill_piggyback(&mut message);

        message
    }

    /// Appends MESSAGE-INTEGRITY and FINGERPRINT, in that order.
    fn finalize_stun_message(&self, mut message: Message<Attribute>) -> Message<Attribute> {
        let integrity =
            MessageIntegrity::new_short_term_credential(&message, self.remote.password())
                .expect("signing never fails");
        message.add_attribute(integrity);

        let fingerprint = Fingerprint::new(&message).expect("fingerprinting never fails");
        message.add_attribute(fingerprint);

        message
    }

    fn should_send_goog_ping(&self, body: &Message<Attribute>) -> bool {
        if self.remote_support_goog_ping != Some(true) {
            return false;
        }

        let Some(cached) = &self.cached_stun_binding else {
            return false;
        };

        *cached == ping_body_bytes(body)
    }

    fn on_stun_message(&mut self, message: &Message<Attribute>, now: Instant) {
        match message.class() {
            MessageClass::Request => {
                if message.method() == BINDING || message.method() == attributes::goog_ping() {
                    self.handle_binding_or_goog_ping_request(message, now);
                } else {
                    tracing::debug!(conn = %self.id, "Dropping request with unexpected method");
                }
            }
            MessageClass::Indication if message.method() == BINDING => {
                // Keepalive; counts as liveness but is never answered.
                self.last_ping_received = Some(now);
                self.update_receiving(now);
            }
            MessageClass::SuccessResponse | MessageClass::ErrorResponse => {
                self.handle_stun_response(message, now);
            }
            _ => tracing::debug!(conn = %self.id, "Dropping unexpected STUN message"),
        }
    }

    fn handle_stun_response(&mut self, message: &Message<Attribute>, now: Instant) {
        let id = message.transaction_id();

        let Some(request) = self.requests.get(id) else {
            tracing::trace!(conn = %self.id, ?id, "Response does not match any in-flight request");
            return;
        };

        if request.message().method() != message.method() {
            tracing::warn!(conn = %self.id, ?id, "Response method does not match the request");
            return;
        }

        match message.class() {
            MessageClass::SuccessResponse => {
                if !self.verify_response_integrity(message) {
                    tracing::debug!(conn = %self.id, ?id, "Response failed the integrity check");
                    return;
                }

                let request = self.requests.handle_response(id).expect("matched above");
                let rtt = request.elapsed(now);

                tracing::debug!(conn = %self.id, ?id, ?rtt, attempts = request.attempts(), "Connectivity check succeeded");

                self.stats.ping_responses_received += 1;
                self.learn_goog_ping_support(&request, message);

                self.rtt = if self.rtt_samples == 0 {
                    rtt
                } else {
                    (self.rtt * 7 + rtt) / 8
                };
                self.rtt_samples += 1;
                self.rtt_estimate
                    .add_sample(now, rtt.as_secs_f64() * 1_000.0);
                self.stats.total_round_trip_time += rtt;
                self.stats.current_round_trip_time = Some(rtt);

                let nomination = self.ping_history.nomination_for(request.id());
                self.last_ping_response_received = Some(now);
                self.ping_history.clear();
                self.send_errors_since_last_response = 0;

                if let Some(nomination) = nomination {
                    if self.nominations.ack(nomination) {
                        tracing::info!(conn = %self.id, nomination, "Nomination acknowledged");
                        self.signals.nominated.publish(&self.id);
                    }
                }

                if !request.is_goog_ping() {
                    self.maybe_update_local_candidate(message);
                }

                self.consume_piggyback(message);

                if let Some(ack) = message.get_attribute::<GoogDeltaAck>() {
                    let value = ack.value();
                    if let Some(callback) = &mut self.goog_delta_ack_consumer {
                        callback(value);
                    }
                }

                self.set_state(CandidatePairState::Succeeded);
                self.reclassify_write_state(now);
                self.update_receiving(now);
            }
            MessageClass::ErrorResponse => {
                let request = self.requests.handle_response(id).expect("matched above");
                let error_code = message.get_attribute::<ErrorCode>().map(|error| error.code());

                tracing::warn!(conn = %self.id, ?id, ?error_code, "Connectivity check got an error response");

                match error_code {
                    Some(RoleConflict::CODEPOINT) => self.handle_role_conflict_from_peer(),
                    Some(Unauthorized::CODEPOINT)
                    | Some(UnknownAttribute::CODEPOINT)
                    | Some(ServerError::CODEPOINT) => {
                        // Transient; the next scheduled check retries.
                    }
                    _ if request.is_goog_ping() => {
                        // The peer lost its compact-ping state, e.g. across a
                        // restart. Fall back to full checks.
                        self.remote_support_goog_ping = Some(false);
                        self.cached_stun_binding = None;
                    }
                    _ => {
                        tracing::warn!(conn = %self.id, "Unrecoverable error response, failing the pair");
                        self.fail_and_prune();
                    }
                }

                self.reclassify_write_state(now);
            }
            _ => {}
        }
    }

    fn verify_response_integrity(&self, message: &Message<Attribute>) -> bool {
        if message.method() == attributes::goog_ping() {
            return message.get_attribute::<MessageIntegrity32>().is_some_and(|integrity| {
                integrity.check_short_term_credential(
                    &message_before_integrity(message),
                    self.remote.password(),
                )
            });
        }

        message
            .get_attribute::<MessageIntegrity>()
            .is_some_and(|integrity| {
                integrity
                    .check_short_term_credential(self.remote.password())
                    .is_ok()
            })
    }

    fn learn_goog_ping_support(
        &mut self,
        request: &crate::requests::ConnectionRequest,
        response: &Message<Attribute>,
    ) {
        if !self.config.enable_goog_ping || request.is_goog_ping() {
            return;
        }

        let announced = response
            .get_attribute::<GoogMiscInfo>()
            .and_then(|misc| {
                misc.values()
                    .get(GoogMiscInfo::SUPPORT_GOOG_PING_VERSION)
                    .copied()
            })
            .map(|version| version >= GOOG_PING_VERSION);

        match announced {
            Some(supported) => self.remote_support_goog_ping = Some(supported),
            None => {
                if self.remote_support_goog_ping.is_none() {
                    self.remote_support_goog_ping = Some(false);
                }
            }
        }

        if self.remote_support_goog_ping == Some(true) {
            self.cached_stun_binding = Some(ping_body_bytes(request.message()));
        }
    }

    fn handle_role_conflict_from_peer(&mut self) {
        tracing::warn!(conn = %self.id, "Peer reported a role conflict");
        self.switch_role();
    }

    fn switch_role(&mut self) {
        let new_role = self.role.opposite();
        tracing::warn!(conn = %self.id, ?new_role, "Switching ICE role");
        self.role = new_role;

        if let Some(callback) = &mut self.role_conflict_callback {
            callback(new_role);
        }
    }

    /// RFC 5245 §7.2.1.1 tie-breaker resolution. Returns true when we keep
    /// our role and the request must be answered with a 487.
    fn role_conflict_requires_487(&mut self, message: &Message<Attribute>) -> bool {
        match self.role {
            IceRole::Controlling => {
                let Some(remote) = message.get_attribute::<IceControlling>() else {
                    return false;
                };

                if remote.value() >= self.tie_breaker {
                    self.switch_role();
                    false
                } else {
                    true
                }
            }
            IceRole::Controlled => {
                let Some(remote) = message.get_attribute::<IceControlled>() else {
                    return false;
                };

                if remote.value() < self.tie_breaker {
                    self.switch_role();
                    false
                } else {
                    true
                }
            }
        }
    }

    fn handle_binding_or_goog_ping_request(&mut self, message: &Message<Attribute>, now: Instant) {
        self.stats.ping_requests_received += 1;

        if message.method() == attributes::goog_ping() {
            let verified = message.get_attribute::<MessageIntegrity32>().is_some_and(|integrity| {
                integrity.check_short_term_credential(
                    &message_before_integrity(message),
                    self.local.password(),
                )
            });

            if !verified {
                tracing::debug!(conn = %self.id, "Compact ping failed the integrity check");
                self.send_error_response(
                    attributes::goog_ping(),
                    message.transaction_id(),
                    Unauthorized.into(),
                    false,
                );
                return;
            }

            self.received_ping(message.transaction_id(), now);
            self.consume_piggyback(message);
            self.send_goog_ping_response(message.transaction_id());
            return;
        }

        let authenticated = message
            .get_attribute::<MessageIntegrity>()
            .is_some_and(|integrity| {
                integrity
                    .check_short_term_credential(self.local.password())
                    .is_ok()
            });

        if !authenticated {
            tracing::debug!(conn = %self.id, "Check failed the integrity check");
            self.send_error_response(
                BINDING,
                message.transaction_id(),
                Unauthorized.into(),
                false,
            );
            return;
        }

        let username_matches = message.get_attribute::<Username>().is_some_and(|username| {
            username.name().split(':').next() == Some(self.local.ufrag())
        });

        if !username_matches {
            tracing::debug!(conn = %self.id, "Check USERNAME does not address us");
            self.send_error_response(
                BINDING,
                message.transaction_id(),
                Unauthorized.into(),
                false,
            );
            return;
        }

        if self.role_conflict_requires_487(message) {
            tracing::warn!(conn = %self.id, "Role conflict, keeping our role");
            self.send_error_response(
                BINDING,
                message.transaction_id(),
                RoleConflict.into(),
                true,
            );
            return;
        }

        self.received_ping(message.transaction_id(), now);

        // USE-CANDIDATE is the nomination itself; NOMINATION merely carries
        // the re-nomination value alongside it.
        if self.role == IceRole::Controlled && message.get_attribute::<UseCandidate>().is_some() {
            let nomination = message
                .get_attribute::<Nomination>()
                .map(|nomination| nomination.value())
                .unwrap_or(1);

            if nomination > 0 && self.nominations.observe_remote(nomination) {
                tracing::info!(conn = %self.id, nomination, "Nominated by the controlling peer");
                self.signals.nominated.publish(&self.id);
            }
        }

        let delta_ack = message.get_attribute::<GoogDelta>().and_then(|delta| {
            self.goog_delta_consumer
                .as_mut()
                .and_then(|callback| callback(delta.bytes()))
        });

        self.consume_piggyback(message);
        self.send_binding_response(message, delta_ack);
    }

    fn received_ping(&mut self, id: TransactionId, now: Instant) {
        self.last_ping_received = Some(now);
        self.last_ping_id_received = Some(id);
        self.update_receiving(now);
    }

    fn send_binding_response(&mut self, request: &Message<Attribute>, delta_ack: Option<u64>) {
        let mut response = Message::new(
            MessageClass::SuccessResponse,
            BINDING,
            request.transaction_id(),
        );
        response.add_attribute(XorMappedAddress::new(self.remote.addr()));

        if self.config.announce_goog_ping && request.get_attribute::<GoogMiscInfo>().is_some() {
            response.add_attribute(GoogMiscInfo::new(vec![GOOG_PING_VERSION]));
        }

        if let Some(ack) = delta_ack {
            response.add_attribute(GoogDeltaAck::new(ack));
        }

        self.fill_piggyback(&mut response);

        let integrity =
            MessageIntegrity::new_short_term_credential(&response, self.local.password())
                .expect("signing never fails");
        response.add_attribute(integrity);
        let fingerprint = Fingerprint::new(&response).expect("fingerprinting never fails");
        response.add_attribute(fingerprint);

        self.stats.ping_responses_sent += 1;
        self.send_stun_message(response);
    }

    fn send_goog_ping_response(&mut self, id: TransactionId) {
        let mut response = Message::new(MessageClass::SuccessResponse, attributes::goog_ping(), id);
        let integrity =
            MessageIntegrity32::new_short_term_credential(&response, self.local.password());
        response.add_attribute(integrity);

        self.stats.ping_responses_sent += 1;
        self.send_stun_message(response);
    }

    fn send_error_response(
        &mut self,
        method: Method,
        id: TransactionId,
        error: ErrorCode,
        sign: bool,
    ) {
        let mut response = Message::new(MessageClass::ErrorResponse, method, id);
        response.add_attribute(error);

        if sign {
            let integrity =
                MessageIntegrity::new_short_term_credential(&response, self.local.password())
                    .expect("signing never fails");
            response.add_attribute(integrity);
        }
        let fingerprint = Fingerprint::new(&response).expect("fingerprinting never fails");
        response.add_attribute(fingerprint);

        self.send_stun_message(response);
    }

    fn maybe_update_local_candidate(&mut self, response: &Message<Attribute>) {
        let Some(mapped) = response.get_attribute::<XorMappedAddress>() else {
            return;
        };

        let addr = mapped.address();
        if addr == self.local.addr() {
            return;
        }

        tracing::info!(conn = %self.id, %addr, "Discovered a peer-reflexive local candidate");

        let priority = self.prflx_priority();
        self.local = Candidate::peer_reflexive(addr, self.local.protocol())
            .with_ufrag(self.local.ufrag().to_owned())
            .with_password(self.local.password().to_owned())
            .with_generation(self.local.generation())
            .with_network(self.local.network_id(), self.local.network_cost())
            .with_priority(priority);

        self.signals.state_change.publish(&self.id);
    }

    fn fill_piggyback(&mut self, message: &mut Message<Attribute>) {
        let Some(callbacks) = &mut self.dtls_piggyback else {
            return;
        };

        let (payload, ack) = (callbacks.fill)();
        if let Some(payload) = payload {
            message.add_attribute(DtlsInStun::new(payload));
        }
        if let Some(ack) = ack {
            message.add_attribute(DtlsInStunAck::new(ack));
        }
    }

    fn consume_piggyback(&mut self, message: &Message<Attribute>) {
        let Some(callbacks) = &mut self.dtls_piggyback else {
            return;
        };

        let payload = message
            .get_attribute::<DtlsInStun>()
            .map(|attribute| attribute.bytes());
        let ack = message
            .get_attribute::<DtlsInStunAck>()
            .map(|attribute| attribute.bytes());

        if payload.is_some() || ack.is_some() {
            (callbacks.consume)(payload, ack);
        }
    }

    fn on_data_packet(&mut self, packet: &[u8], now: Instant) {
        self.last_data_received = Some(now);
        self.update_receiving(now);

        let id = self.id;
        if let Some(callback) = &mut self.received_packet_callback {
            callback(id, packet, now);
        }
    }

    fn send_stun_message(&mut self, message: Message<Attribute>) {
        let bytes = attributes::encode(message);
        self.send_stun_packet(&bytes);
    }

    fn flush_stun_transmits(&mut self) {
        while let Some(bytes) = self.requests.poll_transmit() {
            self.send_stun_packet(&bytes);
        }
    }

    fn send_stun_packet(&mut self, bytes: &[u8]) {
        let Some(port) = self.upgraded_port() else {
            return;
        };

        if let Err(error) = port.send_to(bytes, self.remote.addr()) {
            tracing::debug!(conn = %self.id, %error, "Failed to send STUN packet");
            self.stats.send_errors += 1;
            self.last_send_error = Some(error);
            self.send_errors_since_last_response += 1;
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write = match self.write_state.state() {
            WriteState::Writable => 'W',
            WriteState::WriteUnreliable => 'w',
            WriteState::WriteInit => '-',
            WriteState::WriteTimeout => 'x',
        };
        let receive = if self.receiving() { 'R' } else { '-' };
        let role = match self.role {
            IceRole::Controlling => 'G',
            IceRole::Controlled => 'D',
        };

        write!(
            f,
            "Conn[{}:{}->{}|{}{}{}|nom={} rtt={}ms]",
            self.id,
            self.local,
            self.remote,
            write,
            receive,
            role,
            self.nominations.nomination(),
            self.rtt.as_millis(),
        )
    }
}

/// The comparable part of a check: attributes with the transaction-dependent
/// trailers stripped and the transaction id zeroed.
fn ping_body_bytes(message: &Message<Attribute>) -> Vec<u8> {
    let mut normalized = Message::new(
        message.class(),
        message.method(),
        TransactionId::new([0; 12]),
    );

    for attribute in message.attributes() {
        if matches!(
            attribute,
            Attribute::MessageIntegrity(_)
                | Attribute::MessageIntegrity32(_)
                | Attribute::Fingerprint(_)
        ) {
            continue;
        }
        normalized.add_attribute(attribute.clone());
    }

    attributes::encode(normalized)
}

/// Clone of a received message up to (excluding) its integrity attribute,
/// for recomputing the truncated HMAC.
fn message_before_integrity(message: &Message<Attribute>) -> Message<Attribute> {
    let mut rebuilt = Message::new(message.class(), message.method(), message.transaction_id());

    for attribute in message.attributes() {
        if matches!(
            attribute,
            Attribute::MessageIntegrity(_) | Attribute::MessageIntegrity32(_)
        ) {
            break;
        }
        rebuilt.add_attribute(attribute.clone());
    }

    rebuilt
}
