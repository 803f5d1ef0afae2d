//! Endpoint descriptors for one side of a candidate pair.

use std::fmt;
use std::net::SocketAddr;

/// Transport protocol of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => "udp".fmt(f),
            Protocol::Tcp => "tcp".fmt(f),
        }
    }
}

/// How a candidate was learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relayed,
}

impl CandidateKind {
    /// RFC 5245 §4.1.2.2 recommended type preferences.
    fn type_preference(self) -> u32 {
        match self {
            CandidateKind::Host => 126,
            CandidateKind::PeerReflexive => 110,
            CandidateKind::ServerReflexive => 100,
            CandidateKind::Relayed => 0,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CandidateKind::Host => "host",
            CandidateKind::ServerReflexive => "srflx",
            CandidateKind::PeerReflexive => "prflx",
            CandidateKind::Relayed => "relay",
        }
    }
}

/// One end of a candidate pair: an address plus the ICE bookkeeping that
/// travels with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    addr: SocketAddr,
    protocol: Protocol,
    kind: CandidateKind,
    priority: u32,
    component: u16,
    ufrag: String,
    password: String,
    generation: u32,
    network_id: u16,
    network_cost: u16,
    url: Option<String>,
}

impl Candidate {
    pub fn host(addr: SocketAddr, protocol: Protocol) -> Self {
        Self::new(addr, protocol, CandidateKind::Host)
    }

    pub fn server_reflexive(addr: SocketAddr, protocol: Protocol) -> Self {
        Self::new(addr, protocol, CandidateKind::ServerReflexive)
    }

    pub fn peer_reflexive(addr: SocketAddr, protocol: Protocol) -> Self {
        Self::new(addr, protocol, CandidateKind::PeerReflexive)
    }

    pub fn relayed(addr: SocketAddr, protocol: Protocol) -> Self {
        Self::new(addr, protocol, CandidateKind::Relayed)
    }

    fn new(addr: SocketAddr, protocol: Protocol, kind: CandidateKind) -> Self {
        let component = 1;

        Self {
            addr,
            protocol,
            kind,
            priority: candidate_priority(kind, component),
            component,
            ufrag: String::new(),
            password: String::new(),
            generation: 0,
            network_id: 0,
            network_cost: 0,
            url: None,
        }
    }

    pub fn with_ufrag(mut self, ufrag: impl Into<String>) -> Self {
        self.ufrag = ufrag.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_network(mut self, network_id: u16, network_cost: u16) -> Self {
        self.network_id = network_id;
        self.network_cost = network_cost;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn component(&self) -> u16 {
        self.component
    }

    pub fn ufrag(&self) -> &str {
        &self.ufrag
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn network_id(&self) -> u16 {
        self.network_id
    }

    pub fn network_cost(&self) -> u16 {
        self.network_cost
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub(crate) fn set_ufrag(&mut self, ufrag: impl Into<String>) {
        self.ufrag = ufrag.into();
    }

    pub(crate) fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub(crate) fn set_generation(&mut self, generation: u32) {
        self.generation = generation;
    }

    pub(crate) fn set_network_cost(&mut self, network_cost: u16) {
        self.network_cost = network_cost;
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.kind.as_str(),
            self.protocol,
            self.addr,
            self.generation
        )
    }
}

/// RFC 5245 §4.1.2.1 candidate priority.
fn candidate_priority(kind: CandidateKind, component: u16) -> u32 {
    let local_preference: u32 = 65_535;

    (kind.type_preference() << 24)
        | (local_preference << 8)
        | (256 - u32::from(component.clamp(1, 256)))
}

/// The ufrag/password half of an ICE session description, plus whether the
/// peer supports re-nomination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceParameters {
    pub ufrag: String,
    pub password: String,
    pub renomination: bool,
}

impl IceParameters {
    pub fn new(ufrag: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ufrag: ufrag.into(),
            password: password.into(),
            renomination: false,
        }
    }

    pub fn with_renomination(mut self) -> Self {
        self.renomination = true;
        self
    }
}

/// ICE role of this agent for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    Controlling,
    Controlled,
}

impl IceRole {
    pub fn opposite(self) -> Self {
        match self {
            IceRole::Controlling => IceRole::Controlled,
            IceRole::Controlled => IceRole::Controlling,
        }
    }
}

/// RFC 5245 §5.7.2 pair priority. `G` is the controlling side's candidate
/// priority, `D` the controlled side's.
pub fn pair_priority(role: IceRole, local_priority: u32, remote_priority: u32) -> u64 {
    let (g, d) = match role {
        IceRole::Controlling => (u64::from(local_priority), u64::from(remote_priority)),
        IceRole::Controlled => (u64::from(remote_priority), u64::from(local_priority)),
    };

    (1 << 32) * g.min(d) + 2 * g.max(d) + u64::from(g > d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn host_outranks_relay() {
        let host = Candidate::host(addr("10.0.0.1:4000"), Protocol::Udp);
        let relay = Candidate::relayed(addr("20.0.0.1:3478"), Protocol::Udp);

        assert!(host.priority() > relay.priority());
    }

    #[test]
    fn pair_priority_is_role_symmetric() {
        let local = Candidate::host(addr("10.0.0.1:4000"), Protocol::Udp).priority();
        let remote = Candidate::relayed(addr("20.0.0.1:3478"), Protocol::Udp).priority();

        let controlling = pair_priority(IceRole::Controlling, local, remote);
        let controlled = pair_priority(IceRole::Controlled, remote, local);

        assert_eq!(controlling, controlled);
    }

    #[test]
    fn pair_priority_breaks_ties_toward_the_controlling_side() {
        let high = 200;
        let low = 100;

        let g_higher = pair_priority(IceRole::Controlling, high, low);
        let d_higher = pair_priority(IceRole::Controlling, low, high);

        assert_eq!(g_higher - d_higher, 1);
    }
}
