//! Error taxonomy.
//!
//! `CoordinatorError` covers everything a caller of the coordinator's public
//! API can observe going wrong: socket setup, snapshot I/O, configuration.
//! Wire-level parse failures are deliberately *not* a variant here — they are
//! [`FrameError`], caught at the dispatch boundary and logged, never
//! propagated into request-handling logic (spec §7).

use std::io;
use std::net::SocketAddr;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind { addr: SocketAddr, #[source] source: io::Error },

    #[error("datagram send to {addr} failed: {source}")]
    Send { addr: SocketAddr, #[source] source: io::Error },

    #[error("snapshot write failed: {0}")]
    Snapshot(#[from] io::Error),

    #[error("unknown request id {0}")]
    UnknownRequest(Uuid),

    #[error("transaction {tx} failed: {reason}")]
    Transaction { tx: Uuid, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure to parse an inbound datagram as one of the protocol's frames.
///
/// Always logged and dropped at the dispatch boundary (spec §4.1, §7); never
/// converted into a [`CoordinatorError`] or shown to a peer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown verb {0:?}")]
    UnknownVerb(String),

    #[error("frame {verb} expected at least {expected} tokens, got {actual}")]
    TooFewTokens {
        verb: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid request id {0:?}")]
    InvalidRequestId(String),

    #[error("invalid price {0:?}")]
    InvalidPrice(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },
}
