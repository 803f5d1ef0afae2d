//! Tunable timeouts and protocol extensions of a connection.

use std::time::Duration;

/// Time without any inbound traffic after which a pair stops `receiving`.
pub const RECEIVING_TIMEOUT: Duration = Duration::from_millis(2500);

/// Time without a ping response after which a writable pair degrades to
/// write-unreliable.
pub const UNWRITABLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Unanswered pings after which a writable pair degrades to
/// write-unreliable.
pub const UNWRITABLE_MIN_CHECKS: usize = 6;

/// Time without a ping response after which a pair is written off entirely,
/// provided enough checks also went unanswered.
pub const INACTIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Unanswered pings required (together with [`INACTIVE_TIMEOUT`]) to write a
/// previously responsive pair off entirely.
pub const WRITE_TIMEOUT_FAILURES: usize = 20;

/// Time a never-responsive pair is given to produce its first response.
pub const WRITE_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Unanswered pings required (together with [`WRITE_CONNECT_TIMEOUT`]) to
/// give up on a never-responsive pair.
pub const WRITE_CONNECT_FAILURES: usize = 5;

/// Silence after which a pair that has received traffic before is dead.
pub const DEAD_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum time a pair that has never received anything is kept alive while
/// it is still actively checking.
pub const MIN_LIFETIME: Duration = Duration::from_secs(10);

/// Knobs of a single connection. The timeouts can also be adjusted at
/// runtime through the corresponding setters on
/// [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub receiving_timeout: Duration,
    pub unwritable_timeout: Duration,
    pub unwritable_min_checks: usize,
    pub inactive_timeout: Duration,
    pub write_timeout_failures: usize,
    pub write_connect_timeout: Duration,
    pub write_connect_failures: usize,
    pub dead_receive_timeout: Duration,
    pub min_lifetime: Duration,

    /// Send compact pings once the peer has advertised support for them.
    pub enable_goog_ping: bool,
    /// Advertise compact-ping support in Binding Responses.
    pub announce_goog_ping: bool,
    /// Cap on unanswered pings reported through
    /// [`Connection::too_many_outstanding_pings`](crate::Connection::too_many_outstanding_pings);
    /// the owning channel stops scheduling checks past it.
    pub max_outstanding_pings: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            receiving_timeout: RECEIVING_TIMEOUT,
            unwritable_timeout: UNWRITABLE_TIMEOUT,
            unwritable_min_checks: UNWRITABLE_MIN_CHECKS,
            inactive_timeout: INACTIVE_TIMEOUT,
            write_timeout_failures: WRITE_TIMEOUT_FAILURES,
            write_connect_timeout: WRITE_CONNECT_TIMEOUT,
            write_connect_failures: WRITE_CONNECT_FAILURES,
            dead_receive_timeout: DEAD_RECEIVE_TIMEOUT,
            min_lifetime: MIN_LIFETIME,
            enable_goog_ping: false,
            announce_goog_ping: false,
            max_outstanding_pings: None,
        }
    }
}
