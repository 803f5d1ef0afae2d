//! Hooks for protocols piggybacked on connectivity checks.

use std::fmt;

/// DTLS payload and acknowledgement produced for one outbound STUN message.
pub type PiggybackPayload = (Option<Vec<u8>>, Option<Vec<u8>>);

/// Callbacks wiring a DTLS handshake into connectivity checks.
///
/// While registered, every outbound Binding Request and Response asks `fill`
/// for an opaque payload and acknowledgement to attach, and every inbound
/// one hands whatever it carried to `consume`. Peers that do not know the
/// attributes ignore them, so registering the callbacks never changes the
/// STUN semantics on the wire.
pub struct DtlsPiggybackCallbacks {
    pub(crate) fill: Box<dyn FnMut() -> PiggybackPayload>,
    pub(crate) consume: Box<dyn FnMut(Option<&[u8]>, Option<&[u8]>)>,
}

impl DtlsPiggybackCallbacks {
    pub fn new(
        fill: impl FnMut() -> PiggybackPayload + 'static,
        consume: impl FnMut(Option<&[u8]>, Option<&[u8]>) + 'static,
    ) -> Self {
        Self {
            fill: Box::new(fill),
            consume: Box::new(consume),
        }
    }
}

impl fmt::Debug for DtlsPiggybackCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsPiggybackCallbacks").finish_non_exhaustive()
    }
}

/// Consumes a `GOOG-DELTA` dictionary update from an inbound Binding Request
/// and returns the acknowledgement value to attach to the response.
pub type GoogDeltaConsumer = Box<dyn FnMut(&[u8]) -> Option<u64>>;

/// Receives the `GOOG-DELTA-ACK` value carried by a Binding Response.
pub type GoogDeltaAckConsumer = Box<dyn FnMut(u64)>;
