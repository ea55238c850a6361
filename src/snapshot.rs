//! State Snapshotter (spec §4.6, §9).
//!
//! Grounded on the teacher's `net/connection.rs` `BanList::save`/`load`
//! (`std::fs::write` of a serialized table, reloadable from disk) expanded
//! with the write-temp-then-rename idiom spec §9 calls for ("torn writes
//! must never corrupt the snapshot") — `std::fs::rename` is atomic within a
//! filesystem, so a reader never observes a half-written file. Kept
//! human-readable per spec §4.6 rather than the teacher's `bincode`, since
//! this snapshot is an operator-facing audit trail, not a wire format.

use std::fmt::Write as _;
use std::path::PathBuf;

use tracing::debug;

use crate::net::registry::PeerRegistry;
use crate::net::request::RequestTable;

/// An owned, point-in-time copy of the registry and request table, taken
/// under the engine's lock and rendered to disk after it is released.
#[derive(Debug)]
pub struct Snapshot {
    peers: Vec<PeerLine>,
    requests: Vec<RequestLine>,
}

#[derive(Debug)]
struct PeerLine {
    name: String,
    datagram_addr: String,
    stream_port: u16,
}

#[derive(Debug)]
struct RequestLine {
    request_id: String,
    buyer_name: String,
    item_name: String,
    state: String,
    disposition: String,
    created_at: String,
}

impl Snapshot {
    pub fn capture(registry: &PeerRegistry, requests: &RequestTable) -> Self {
        let peers = registry
            .iter()
            .map(|p| PeerLine {
                name: p.name.clone(),
                datagram_addr: p.datagram_addr.to_string(),
                stream_port: p.stream_port,
            })
            .collect();
        let requests = requests
            .iter()
            .map(|(id, r)| RequestLine {
                request_id: id.to_string(),
                buyer_name: r.buyer_name.clone(),
                item_name: r.item_name.clone(),
                state: format!("{:?}", r.state),
                disposition: format!("{:?}", r.disposition),
                created_at: r.created_at.to_rfc3339(),
            })
            .collect();
        Self { peers, requests }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# agora coordinator snapshot");
        let _ = writeln!(out, "# peers: {}", self.peers.len());
        for p in &self.peers {
            let _ = writeln!(out, "PEER {} {} {}", p.name, p.datagram_addr, p.stream_port);
        }
        let _ = writeln!(out, "# requests: {}", self.requests.len());
        for r in &self.requests {
            let _ = writeln!(
                out,
                "REQUEST {} buyer={} item={} state={} disposition={} created_at={}",
                r.request_id, r.buyer_name, r.item_name, r.state, r.disposition, r.created_at
            );
        }
        out
    }
}

/// Writes [`Snapshot`]s to `path`, best-effort: a failed write is logged,
/// never surfaced as a reason to reject or roll back the in-memory mutation
/// that triggered it (spec §4.6: "failures are logged, not fatal").
pub struct Snapshotter {
    path: PathBuf,
}

impl Snapshotter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn write(&self, snapshot: &Snapshot) -> std::io::Result<()> {
        let path = self.path.clone();
        let text = snapshot.render();
        let result = tokio::task::spawn_blocking(move || write_atomic(&path, &text))
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, format!("snapshot task panicked: {err}")))?;
        if result.is_ok() {
            debug!(path = %self.path.display(), "snapshot written");
        }
        result
    }
}

fn write_atomic(path: &std::path::Path, text: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, text)?;
    std::fs::rename(&tmp_path, path)
}
