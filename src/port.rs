//! The downward interface a connection consumes from its owning port.

use std::net::SocketAddr;

use crate::connection::ConnectionId;

/// Errors surfaced by [`Port::send_to`] or the connection's own send gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("transport is not connected yet")]
    NotConnected,
    #[error("the owning port is gone")]
    PortGone,
    #[error("socket error (os error {0})")]
    Socket(i32),
}

/// The slice of a port a connection is allowed to touch.
///
/// Connections hold this behind a `Weak` reference: a port may be torn down
/// while a connection still has callbacks in flight, in which case every
/// operation that needs the port silently becomes a no-op.
pub trait Port {
    /// Sends an encoded packet to the given remote address.
    fn send_to(&self, packet: &[u8], dest: SocketAddr) -> Result<usize, SendError>;

    /// Finalises a connection that has shut down.
    fn destroy_connection(&self, id: ConnectionId);
}
