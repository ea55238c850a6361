//! Datagram Endpoint (spec §4.1).
//!
//! Grounded on the teacher's `main.rs` event-loop shape (`Arc<Node>`, a
//! `tokio::spawn`'d loop that keeps running until `ctrl_c`) generalized from
//! a TCP accept-loop-per-connection to a UDP receive-loop-per-datagram, so
//! one malformed or slow-to-handle frame never blocks the next (spec §4.1:
//! "the endpoint must not let one inbound frame's handling delay another").

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{trace, warn};

use crate::error::CoordinatorError;
use crate::net::engine::Engine;
use crate::net::message::{parse_client_frame, ClientFrame, ServerFrame};

/// UDP control-plane socket, wrapped so sends are serialized through one
/// handle (spec §4.1: "a single outbound send path") while receives are
/// dispatched concurrently.
pub struct Endpoint {
    socket: UdpSocket,
    send_lock: AsyncMutex<()>,
}

impl Endpoint {
    pub async fn bind(addr: SocketAddr) -> Result<Self, CoordinatorError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| CoordinatorError::Bind { addr, source })?;
        Ok(Self { socket, send_lock: AsyncMutex::new(()) })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send(&self, to: SocketAddr, frame: &ServerFrame) -> Result<(), CoordinatorError> {
        let wire = frame.to_string();
        let _guard = self.send_lock.lock().await;
        self.socket
            .send_to(wire.as_bytes(), to)
            .await
            .map(|_| ())
            .map_err(|source| CoordinatorError::Send { addr: to, source })
    }

    async fn recv(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; crate::net::message::MAX_FRAME_BYTES];
        let (n, src) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, src))
    }

    /// Run the receive loop forever, spawning a task per datagram so a slow
    /// handler for one frame never delays the next (spec §4.1).
    pub async fn run(self: Arc<Self>, engine: Arc<Engine>) -> std::io::Result<()> {
        loop {
            let (buf, src_addr) = self.recv().await?;
            let engine = engine.clone();
            tokio::spawn(async move {
                dispatch(engine, &buf, src_addr).await;
            });
        }
    }
}

async fn dispatch(engine: Arc<Engine>, buf: &[u8], src_addr: SocketAddr) {
    let frame = match parse_client_frame(buf) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%src_addr, error = %err, "dropping malformed datagram");
            return;
        }
    };
    trace!(%src_addr, verb = frame.verb(), "dispatching frame");

    match frame {
        ClientFrame::Register { rq, name, stream_port, .. } => {
            engine.handle_register(rq, name, src_addr, stream_port).await;
        }
        ClientFrame::Deregister { rq, name } => {
            engine.handle_deregister(rq, name, src_addr).await;
        }
        ClientFrame::LookingFor { rq, buyer, item, description, max_price } => {
            engine.handle_looking_for(rq, buyer, item, description, max_price).await;
        }
        ClientFrame::Offer { rq, seller, price, .. } => {
            engine.handle_offer(rq, seller, price, src_addr).await;
        }
        ClientFrame::Accept { rq, price, .. } => {
            engine.handle_accept(rq, price, src_addr).await;
        }
        ClientFrame::Refuse { rq, price, .. } => {
            engine.handle_refuse(rq, price).await;
        }
        ClientFrame::Buy { rq, price, .. } => {
            engine.handle_buy(rq, price).await;
        }
        ClientFrame::Cancel { rq, price, .. } => {
            engine.handle_cancel(rq, price).await;
        }
    }
}
