//! Configuration.
//!
//! Mirrors the teacher's `Args` (clap) → `NetConfig` (plain struct) split:
//! the CLI only exists in the binaries; library code takes a plain config
//! struct with spec-accurate defaults so it can be constructed directly in
//! tests without going through `clap`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Offer window: 10s from first OFFER (spec §5, §9).
pub const DEFAULT_OFFER_WINDOW_SECS: u64 = 10;
/// No-offer abandon timeout: 120s from SEARCH fan-out (spec §5, §9).
pub const DEFAULT_ABANDON_TIMEOUT_SECS: u64 = 120;
/// Per-I/O transaction timeout (spec §4.5, §5).
pub const DEFAULT_TRANSACTION_IO_TIMEOUT_SECS: u64 = 30;

/// Coordinator runtime configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// UDP bind address for the control plane.
    pub bind_addr: SocketAddr,
    /// Duration from first OFFER to offer-window expiration.
    pub offer_window: Duration,
    /// Duration from SEARCH fan-out to no-offer abandonment.
    pub abandon_timeout: Duration,
    /// Per read/write timeout on transaction stream connections.
    pub transaction_io_timeout: Duration,
    /// Path to the human-readable state snapshot file.
    pub snapshot_path: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".parse().expect("static addr"),
            offer_window: Duration::from_secs(DEFAULT_OFFER_WINDOW_SECS),
            abandon_timeout: Duration::from_secs(DEFAULT_ABANDON_TIMEOUT_SECS),
            transaction_io_timeout: Duration::from_secs(DEFAULT_TRANSACTION_IO_TIMEOUT_SECS),
            snapshot_path: PathBuf::from("agora-state.snapshot"),
        }
    }
}

/// CLI surface for `agora-coordinator`.
///
/// Only `--bind` is normative per spec §6; the timer and snapshot-path flags
/// are operator conveniences layered on top, all optional.
#[derive(Parser, Debug)]
#[command(name = "agora-coordinator", version, about = "Agora marketplace coordinator")]
pub struct CoordinatorArgs {
    /// UDP bind address for the control plane.
    #[arg(long, default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Offer-window duration in seconds (from first OFFER).
    #[arg(long, default_value_t = DEFAULT_OFFER_WINDOW_SECS)]
    pub offer_window_secs: u64,

    /// No-offer abandon timeout in seconds (from fan-out).
    #[arg(long, default_value_t = DEFAULT_ABANDON_TIMEOUT_SECS)]
    pub abandon_timeout_secs: u64,

    /// Per-I/O transaction timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TRANSACTION_IO_TIMEOUT_SECS)]
    pub transaction_io_timeout_secs: u64,

    /// Path to the state snapshot file.
    #[arg(long, default_value = "agora-state.snapshot")]
    pub snapshot_path: PathBuf,
}

impl From<CoordinatorArgs> for CoordinatorConfig {
    fn from(args: CoordinatorArgs) -> Self {
        Self {
            bind_addr: args.bind,
            offer_window: Duration::from_secs(args.offer_window_secs),
            abandon_timeout: Duration::from_secs(args.abandon_timeout_secs),
            transaction_io_timeout: Duration::from_secs(args.transaction_io_timeout_secs),
            snapshot_path: args.snapshot_path,
        }
    }
}

/// Peer participant configuration (spec §2 component 7 — external, but its
/// wire-facing shape is fixed by this crate so the reference binary can
/// interoperate with the coordinator above).
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub coordinator_addr: SocketAddr,
    pub udp_bind_addr: SocketAddr,
    pub stream_bind_addr: SocketAddr,
    pub inventory_path: PathBuf,
}

#[derive(Parser, Debug)]
#[command(name = "agora-peer", version, about = "Agora marketplace peer participant")]
pub struct PeerArgs {
    /// This peer's unique, case-sensitive name.
    #[arg(long)]
    pub name: String,

    /// Coordinator's UDP control-plane address.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub coordinator: SocketAddr,

    /// Local UDP address to send/receive control-plane datagrams on.
    #[arg(long, default_value = "127.0.0.1:0")]
    pub udp_bind: SocketAddr,

    /// Local address to accept inbound transaction stream connections on.
    #[arg(long, default_value = "127.0.0.1:0")]
    pub stream_bind: SocketAddr,

    /// Path to this peer's inventory file (JSON array of items).
    #[arg(long, default_value = "inventory.json")]
    pub inventory: PathBuf,
}

impl From<PeerArgs> for PeerConfig {
    fn from(args: PeerArgs) -> Self {
        Self {
            name: args.name,
            coordinator_addr: args.coordinator,
            udp_bind_addr: args.udp_bind,
            stream_bind_addr: args.stream_bind,
            inventory_path: args.inventory,
        }
    }
}
