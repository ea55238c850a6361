//! Peer Registry (spec §4.2).
//!
//! Grounded on the teacher's `net/peer.rs` (`Peer` field layout) and
//! `net/addrman.rs` (name-keyed table with register/lookup operations). This
//! module is deliberately lock-free — [`Engine`](super::engine::Engine) owns
//! the single mutex that guards both this table and the request table, per
//! spec §4.2 ("guarded by a single reentrant mutex shared with the Request
//! Table").

use std::collections::HashMap;
use std::net::SocketAddr;

use uuid::Uuid;

/// A registered peer's routing information.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub name: String,
    /// Learned from the observed UDP source address of REGISTER, never from
    /// the claimed host in the frame (spec §4.2: "ignoring any address the
    /// client may have claimed, to prevent spoofing of the mapping").
    pub datagram_addr: SocketAddr,
    /// Advertised port for inbound stream connections; host is
    /// `datagram_addr`'s host.
    pub stream_port: u16,
    /// The `rq` used at registration, kept for audit.
    pub registration_rq: Uuid,
}

impl Peer {
    /// The address a transaction orchestrator should dial to reach this
    /// peer's stream listener.
    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.datagram_addr.ip(), self.stream_port)
    }
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    Denied,
}

/// Outcome of a deregistration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregisterOutcome {
    Deregistered,
    Denied,
}

/// Mapping from peer name to routing info (spec §3, §4.2).
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self { peers: HashMap::new() }
    }

    /// Register `name`, binding its datagram address to `src_addr` — the
    /// address actually observed on the wire, not anything the peer claims.
    /// Denied when the name is already present (invariant: at most one peer
    /// per name).
    pub fn register(
        &mut self,
        name: &str,
        src_addr: SocketAddr,
        advertised_stream_port: u16,
        rq: Uuid,
    ) -> RegisterOutcome {
        if self.peers.contains_key(name) {
            return RegisterOutcome::Denied;
        }
        self.peers.insert(
            name.to_string(),
            Peer {
                name: name.to_string(),
                datagram_addr: src_addr,
                stream_port: advertised_stream_port,
                registration_rq: rq,
            },
        );
        RegisterOutcome::Registered
    }

    /// Remove `name` from the registry. Cascading removal of that peer's
    /// buyer requests is the caller's responsibility (it needs the request
    /// table, which this type does not hold — see
    /// [`Engine::deregister`](super::engine::Engine::deregister)).
    pub fn deregister(&mut self, name: &str) -> DeregisterOutcome {
        if self.peers.remove(name).is_some() {
            DeregisterOutcome::Deregistered
        } else {
            DeregisterOutcome::Denied
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Peer> {
        self.peers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    /// All registered peers except `name`, snapshotted for SEARCH fan-out
    /// (spec §4.3: "Snapshot the current set S of all registered peers
    /// except the buyer").
    pub fn all_except(&self, name: &str) -> Vec<Peer> {
        self.peers
            .values()
            .filter(|p| p.name != name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn register_then_duplicate_is_denied() {
        let mut reg = PeerRegistry::new();
        assert_eq!(
            reg.register("A", addr(6000), 7000, Uuid::new_v4()),
            RegisterOutcome::Registered
        );
        assert_eq!(
            reg.register("A", addr(6001), 7001, Uuid::new_v4()),
            RegisterOutcome::Denied
        );
        // First registration's address sticks.
        assert_eq!(reg.lookup("A").unwrap().datagram_addr, addr(6000));
    }

    #[test]
    fn deregister_then_reregister_succeeds() {
        let mut reg = PeerRegistry::new();
        reg.register("A", addr(6000), 7000, Uuid::new_v4());
        assert_eq!(reg.deregister("A"), DeregisterOutcome::Deregistered);
        assert_eq!(reg.deregister("A"), DeregisterOutcome::Denied);
        assert_eq!(
            reg.register("A", addr(6002), 7002, Uuid::new_v4()),
            RegisterOutcome::Registered
        );
    }

    #[test]
    fn claimed_host_is_ignored_source_is_authoritative() {
        let mut reg = PeerRegistry::new();
        // The claimed host never reaches this layer at all — only the
        // observed `src_addr` does, which is the point under test.
        reg.register("A", addr(9999), 7000, Uuid::new_v4());
        assert_eq!(reg.lookup("A").unwrap().datagram_addr.port(), 9999);
    }

    #[test]
    fn all_except_excludes_the_named_peer() {
        let mut reg = PeerRegistry::new();
        reg.register("A", addr(1), 1, Uuid::new_v4());
        reg.register("B", addr(2), 2, Uuid::new_v4());
        reg.register("C", addr(3), 3, Uuid::new_v4());
        let mut names: Vec<_> = reg.all_except("A").into_iter().map(|p| p.name).collect();
        names.sort();
        assert_eq!(names, vec!["B", "C"]);
    }
}
