//! A SANS-IO ICE candidate-pair connectivity engine.
//!
//! [`Connection`] is the state machine behind one directed candidate pair:
//! it drives STUN Binding checks towards the remote candidate, derives
//! writability and receiving state from their outcomes, tracks nominations
//! in both roles and publishes lifecycle events to the owning transport
//! channel. It is built in a SANS-IO fashion, meaning it neither advances
//! time nor network state on its own. Instead, the owner needs to call:
//!
//! - [`Connection::on_read_packet`] for packets received on the pair
//! - [`Connection::ping`] to initiate a connectivity check
//! - [`Connection::update_state`] on its periodic tick
//! - [`Connection::handle_timeout`] when [`Connection::poll_timeout`] fires
//!
//! Outbound packets flow through the [`Port`] the connection holds weakly;
//! once the port is gone every operation quietly becomes a no-op.
//!
//! Everything happens on a single network sequence: the engine is not
//! `Send`, never blocks, and callers on other threads must post onto that
//! sequence. Signals fire synchronously on it, after the state that
//! motivates them has been updated, and `destroyed` is the last signal an
//! observer will ever receive from a connection.

pub mod attributes;
mod backoff;
mod candidate;
mod config;
mod connection;
mod nomination;
mod ping_history;
mod piggyback;
mod port;
mod publisher;
mod rate;
mod receiving;
mod requests;
mod rtt;
mod stats;
mod write_state;

pub use candidate::{pair_priority, Candidate, CandidateKind, IceParameters, IceRole, Protocol};
pub use config::ConnectionConfig;
pub use connection::{CandidatePairState, Connection, ConnectionId};
pub use piggyback::{DtlsPiggybackCallbacks, GoogDeltaAckConsumer, GoogDeltaConsumer};
pub use ping_history::SentPing;
pub use port::{Port, SendError};
pub use publisher::{Publisher, SubscriptionId};
pub use rtt::EventBasedEma;
pub use stats::ConnectionStats;
pub use write_state::WriteState;
