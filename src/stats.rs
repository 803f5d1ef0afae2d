//! Counters a connection reports up to its owning channel.

use std::time::Duration;

/// Cumulative traffic and check counters for one candidate pair.
///
/// Rates over the recent window are queried separately via
/// [`Connection::send_rate`](crate::Connection::send_rate) and
/// [`Connection::recv_rate`](crate::Connection::recv_rate).
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub send_errors: u64,

    /// Connectivity checks sent, not counting retransmissions.
    pub ping_requests_total: u64,
    /// Checks sent before the pair ever saw a response.
    pub ping_requests_before_first_response: u64,
    pub ping_responses_received: u64,
    pub ping_requests_received: u64,
    pub ping_responses_sent: u64,

    /// Sum of all round-trip time samples.
    pub total_round_trip_time: Duration,
    /// The most recent round-trip time sample.
    pub current_round_trip_time: Option<Duration>,
}
