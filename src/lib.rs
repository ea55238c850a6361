//! Agora: a small distributed marketplace.
//!
//! Autonomous peers register with a central coordinator, advertise items from
//! local inventories, and transact with each other. A buyer asks the
//! coordinator to find an item under a maximum price; the coordinator
//! solicits offers from every other peer, selects the best one, optionally
//! negotiates, then escalates the winning pair into a three-way transaction.
//!
//! The coordinator's request-lifecycle state machine ([`net::engine`]) is the
//! core of this crate. Everything else — the registry, the wire protocol, the
//! transaction orchestrator, the snapshotter — exists to support it.

pub mod config;
pub mod error;
pub mod net;
pub mod peer_kit;
pub mod snapshot;

pub use config::{CoordinatorConfig, PeerConfig};
pub use error::{CoordinatorError, FrameError};
pub use net::{
    ClientFrame, Endpoint, Engine, Offer, Peer, PeerRegistry, RequestRecord, RequestState,
    RequestTable, ServerFrame,
};
pub use snapshot::Snapshotter;
