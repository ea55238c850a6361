//! Transaction Orchestrator (spec §4.5).
//!
//! Grounded on the teacher's `net/encrypted.rs` connection-establishment
//! shape (`TcpStream::connect`, `tokio::io::split` into owned read/write
//! halves, async read/write of framed messages) adapted from Noise's binary
//! handshake frames to this protocol's newline-delimited text frames, and on
//! the same module's per-operation timeout discipline generalized from
//! `NOISE_HANDSHAKE_TIMEOUT_SECS` to the spec's 30 s transaction I/O budget.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::net::engine::Engine;
use crate::net::message::StreamFrame;
use crate::net::registry::Peer;

/// Seller's share of a completed transaction; the coordinator retains the
/// rest (spec §4.5, §3).
const SELLER_SHARE: f64 = 0.90;

pub struct Orchestrator;

impl Orchestrator {
    /// Drive one BUY through to Completed or Failed. Never holds the
    /// engine's lock while connecting or exchanging frames; only the final
    /// `complete_transaction`/`fail_transaction` callback reacquires it
    /// (spec §4.5: "must not hold the registry/request-table mutex across
    /// network I/O").
    pub async fn run(
        engine: Arc<Engine>,
        rq: Uuid,
        transaction_id: Uuid,
        buyer: Peer,
        seller: Peer,
        item: String,
        price: f64,
        io_timeout: Duration,
    ) {
        let mut buyer_conn = match Connection::open(buyer.stream_addr(), io_timeout).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(%rq, %transaction_id, addr = %buyer.stream_addr(), error = %err, "failed to connect to buyer");
                engine.fail_transaction(rq, transaction_id, format!("buyer unreachable: {err}")).await;
                return;
            }
        };
        let mut seller_conn = match Connection::open(seller.stream_addr(), io_timeout).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(%rq, %transaction_id, addr = %seller.stream_addr(), error = %err, "failed to connect to seller");
                buyer_conn.send_cancel(transaction_id, "seller unreachable", io_timeout).await;
                engine.fail_transaction(rq, transaction_id, format!("seller unreachable: {err}")).await;
                return;
            }
        };

        let buyer_res = buyer_conn.inform(transaction_id, &item, price, io_timeout).await;
        let seller_res = seller_conn.inform(transaction_id, &item, price, io_timeout).await;

        let (buyer_res, seller_res) = match (buyer_res, seller_res) {
            (Ok(b), Ok(s)) => (b, s),
            (buyer_res, _) => {
                let reason = if buyer_res.is_err() { "buyer INFORM failed" } else { "seller INFORM failed" };
                warn!(%rq, %transaction_id, %reason, "transaction aborted during INFORM");
                buyer_conn.send_cancel(transaction_id, reason, io_timeout).await;
                seller_conn.send_cancel(transaction_id, reason, io_timeout).await;
                engine.fail_transaction(rq, transaction_id, reason.to_string()).await;
                return;
            }
        };

        let seller_cut = price * SELLER_SHARE;
        let coordinator_cut = price - seller_cut;
        info!(
            %rq, %transaction_id, buyer = %buyer_res.name, seller = %seller_res.name,
            charged = price, seller_cut, coordinator_cut,
            "settlement simulated (no external payment provider)"
        );

        let shipping = StreamFrame::ShippingInfo {
            tx: transaction_id,
            buyer_name: buyer_res.name.clone(),
            buyer_address: buyer_res.address.clone(),
        };
        if let Err(err) = seller_conn.write_frame(&shipping, io_timeout).await {
            warn!(%rq, %transaction_id, error = %err, "failed to deliver shipping info to seller");
            engine.fail_transaction(rq, transaction_id, format!("shipping info delivery failed: {err}")).await;
            return;
        }

        // Close buyer first, then seller (spec §4.5 step 4).
        buyer_conn.shutdown().await;
        seller_conn.shutdown().await;

        engine.complete_transaction(rq, transaction_id).await;
    }
}

/// One outbound transaction-protocol connection, split so line-buffered
/// reads and writes can proceed independently.
struct Connection {
    reader: BufReader<ReadHalf<TcpStream>>,
    writer: WriteHalf<TcpStream>,
}

struct InformRes {
    name: String,
    address: String,
}

impl Connection {
    async fn open(addr: SocketAddr, io_timeout: Duration) -> std::io::Result<Self> {
        let stream = timeout(io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
        let (read_half, writer) = tokio::io::split(stream);
        Ok(Self { reader: BufReader::new(read_half), writer })
    }

    async fn write_frame(&mut self, frame: &StreamFrame, io_timeout: Duration) -> std::io::Result<()> {
        let mut line = frame.to_string();
        line.push('\n');
        timeout(io_timeout, self.writer.write_all(line.as_bytes()))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))?
    }

    async fn inform(
        &mut self,
        transaction_id: Uuid,
        item: &str,
        price: f64,
        io_timeout: Duration,
    ) -> std::io::Result<InformRes> {
        let req = StreamFrame::InformReq { tx: transaction_id, item: item.to_string(), price };
        self.write_frame(&req, io_timeout).await?;

        let mut line = String::new();
        let n = timeout(io_timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "INFORM_Res timed out"))??;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed before INFORM_Res"));
        }
        match StreamFrame::parse(line.trim()) {
            Ok(StreamFrame::InformRes { tx, name, address, .. }) if tx == transaction_id => {
                Ok(InformRes { name, address })
            }
            Ok(_) => {
                Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "unexpected frame or mismatched transaction id"))
            }
            Err(err) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())),
        }
    }

    async fn send_cancel(&mut self, transaction_id: Uuid, reason: &str, io_timeout: Duration) {
        let frame = StreamFrame::Cancel { tx: transaction_id, reason: reason.to_string() };
        if let Err(err) = self.write_frame(&frame, io_timeout).await {
            warn!(%transaction_id, error = %err, "failed to deliver CANCEL");
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}
