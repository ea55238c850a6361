//! Reference Peer Participant (spec §2 component 7).
//!
//! External to the coordinator's design budget, but its wire-facing shape
//! has to match exactly, so a runnable implementation lives here for
//! interoperability testing. Grounded on the teacher's `net/connection.rs`
//! `BanList::load`/`save` (`std::fs` read/write of a serialized table) for
//! [`Inventory`]'s persistence, swapping `bincode` for `serde_json` since an
//! operator-edited item list benefits from being readable, and on the same
//! module's `Arc<Self>` + `tokio::spawn` receive-loop shape used throughout
//! this crate's coordinator side.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PeerConfig;
use crate::error::CoordinatorError;
use crate::net::message::{parse_server_frame, ClientFrame, ServerFrame, StreamFrame};

/// One item a peer is willing to sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    pub price: f64,
    pub description: String,
}

/// A peer's local catalogue, loaded from a JSON file (spec §2 component 7's
/// "local inventory").
#[derive(Debug, Default)]
pub struct Inventory {
    items: HashMap<String, InventoryItem>,
}

impl Inventory {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let items: Vec<InventoryItem> = serde_json::from_slice(&data)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        Ok(Self { items: items.into_iter().map(|i| (i.name.clone(), i)).collect() })
    }

    pub fn get(&self, name: &str) -> Option<&InventoryItem> {
        self.items.get(name)
    }
}

/// Billing details this peer presents in INFORM_Res — simulated, never a
/// real payment instrument (spec §4.5 explicitly has no external provider).
#[derive(Debug, Clone)]
pub struct BillingProfile {
    pub cc_number: String,
    pub cc_expiry: String,
    pub address: String,
}

impl Default for BillingProfile {
    fn default() -> Self {
        Self { cc_number: "4111111111111111".into(), cc_expiry: "12/29".into(), address: "1 Market St".into() }
    }
}

/// An outstanding LOOKING_FOR this peer originated as a buyer, kept so the
/// UDP receive loop knows how to react to FOUND/NOT_AVAILABLE/NOT_FOUND for
/// it.
#[derive(Debug, Clone)]
struct OutstandingSearch {
    item: String,
    max_price: f64,
}

/// Runnable reference implementation of the peer side of the protocol.
pub struct PeerClient {
    config: PeerConfig,
    socket: Arc<UdpSocket>,
    coordinator_addr: SocketAddr,
    inventory: Inventory,
    billing: BillingProfile,
    searches: Mutex<HashMap<Uuid, OutstandingSearch>>,
    stream_listen_port: u16,
}

impl PeerClient {
    /// Binds both the UDP control-plane socket and the TCP transaction
    /// listener up front, since REGISTER must advertise the listener's port
    /// (spec §4.2) before any transaction can reach it.
    pub async fn bind(config: PeerConfig, inventory: Inventory) -> Result<(Arc<Self>, TcpListener), CoordinatorError> {
        let socket = UdpSocket::bind(config.udp_bind_addr)
            .await
            .map_err(|source| CoordinatorError::Bind { addr: config.udp_bind_addr, source })?;
        let listener = TcpListener::bind(config.stream_bind_addr)
            .await
            .map_err(|source| CoordinatorError::Bind { addr: config.stream_bind_addr, source })?;
        let stream_listen_port = listener
            .local_addr()
            .map_err(|source| CoordinatorError::Bind { addr: config.stream_bind_addr, source })?
            .port();
        let coordinator_addr = config.coordinator_addr;
        let client = Arc::new(Self {
            config,
            socket: Arc::new(socket),
            coordinator_addr,
            inventory,
            billing: BillingProfile::default(),
            searches: Mutex::new(HashMap::new()),
            stream_listen_port,
        });
        Ok((client, listener))
    }

    async fn send(&self, frame: &ClientFrame) -> Result<(), CoordinatorError> {
        let wire = frame.to_string();
        self.socket
            .send_to(wire.as_bytes(), self.coordinator_addr)
            .await
            .map(|_| ())
            .map_err(|source| CoordinatorError::Send { addr: self.coordinator_addr, source })
    }

    /// REGISTER with the coordinator (spec §4.2). Does not wait for
    /// REGISTERED/REGISTER-DENIED; the caller observes the reply via the
    /// same receive loop that handles everything else.
    pub async fn register(&self) -> Result<(), CoordinatorError> {
        let local_udp_port = self.socket.local_addr().map(|a| a.port()).unwrap_or(0);
        let frame = ClientFrame::Register {
            rq: Uuid::new_v4(),
            name: self.config.name.clone(),
            claimed_host: self.config.udp_bind_addr.ip().to_string(),
            udp_port: local_udp_port,
            stream_port: self.stream_listen_port,
        };
        info!(name = %self.config.name, "registering with coordinator");
        self.send(&frame).await
    }

    pub async fn deregister(&self) -> Result<(), CoordinatorError> {
        let frame = ClientFrame::Deregister { rq: Uuid::new_v4(), name: self.config.name.clone() };
        self.send(&frame).await
    }

    /// Ask the coordinator to find `item` at or under `max_price` (spec
    /// §4.3 entry point).
    pub async fn looking_for(&self, item: &str, description: &str, max_price: f64) -> Result<Uuid, CoordinatorError> {
        let rq = Uuid::new_v4();
        self.searches
            .lock()
            .await
            .insert(rq, OutstandingSearch { item: item.to_string(), max_price });
        let frame = ClientFrame::LookingFor {
            rq,
            buyer: self.config.name.clone(),
            item: item.to_string(),
            description: description.to_string(),
            max_price,
        };
        self.send(&frame).await?;
        Ok(rq)
    }

    /// Run the UDP receive loop and the inbound transaction-stream listener
    /// concurrently; returns only on I/O failure. `listener` is the one
    /// returned by [`PeerClient::bind`].
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(stream_addr = %listener.local_addr()?, "peer transaction listener bound");

        let accept_loop = {
            let client = self.clone();
            async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer_addr)) => {
                            let client = client.clone();
                            tokio::spawn(async move {
                                if let Err(err) = client.serve_transaction(stream).await {
                                    warn!(%peer_addr, error = %err, "transaction stream handling failed");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "accept failed"),
                    }
                }
            }
        };

        let udp_loop = async {
            let mut buf = vec![0u8; crate::net::message::MAX_FRAME_BYTES];
            loop {
                let (n, _src) = self.socket.recv_from(&mut buf).await?;
                let frame = match parse_server_frame(&buf[..n]) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "dropping malformed frame from coordinator");
                        continue;
                    }
                };
                let client = self.clone();
                tokio::spawn(async move { client.handle_server_frame(frame).await });
            }
            #[allow(unreachable_code)]
            Ok::<(), std::io::Error>(())
        };

        tokio::select! {
            _ = accept_loop => Ok(()),
            res = udp_loop => res,
        }
    }

    async fn handle_server_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Registered { rq } => info!(%rq, "registered"),
            ServerFrame::RegisterDenied { rq, reason } => warn!(%rq, %reason, "registration denied"),
            ServerFrame::Deregistered { rq } => info!(%rq, "deregistered"),
            ServerFrame::DeregisterDenied { rq, reason } => warn!(%rq, %reason, "deregistration denied"),
            ServerFrame::Search { rq, item, description } => self.handle_search(rq, item, description).await,
            ServerFrame::Negotiate { rq, item, max_price } => self.handle_negotiate(rq, item, max_price).await,
            ServerFrame::Reserve { rq, item, price } => {
                debug!(%rq, %item, price, "reservation confirmed by coordinator as seller");
            }
            ServerFrame::Found { rq, item, price, seller } => {
                self.searches.lock().await.remove(&rq);
                info!(%rq, %item, price, %seller, "found, buying");
                let frame = ClientFrame::Buy { rq, item, price };
                if let Err(err) = self.send(&frame).await {
                    warn!(%rq, error = %err, "failed to send BUY");
                }
            }
            ServerFrame::NotAvailable { rq, item, .. } => {
                let original = self.searches.lock().await.remove(&rq);
                info!(%rq, %item, ?original, "not available");
            }
            ServerFrame::NotFound { rq, item, .. } => {
                self.searches.lock().await.remove(&rq);
                info!(%rq, %item, "negotiation refused, not found");
            }
            ServerFrame::Cancel { rq, item, price } => info!(%rq, %item, price, "reservation cancelled by buyer"),
        }
    }

    async fn handle_search(&self, rq: Uuid, item: String, _description: String) {
        let Some(listing) = self.inventory.get(&item) else {
            debug!(%rq, %item, "no matching item, not offering");
            return;
        };
        let frame = ClientFrame::Offer {
            rq,
            seller: self.config.name.clone(),
            item: item.clone(),
            price: listing.price,
        };
        if let Err(err) = self.send(&frame).await {
            warn!(%rq, error = %err, "failed to send OFFER");
        }
    }

    async fn handle_negotiate(&self, rq: Uuid, item: String, max_price: f64) {
        let Some(listing) = self.inventory.get(&item) else {
            let frame = ClientFrame::Refuse { rq, item, price: max_price };
            let _ = self.send(&frame).await;
            return;
        };
        // Simple policy: accept any negotiated price at or above half our
        // listed price, otherwise refuse.
        if max_price >= listing.price * 0.5 {
            let frame = ClientFrame::Accept { rq, item, price: max_price };
            let _ = self.send(&frame).await;
        } else {
            let frame = ClientFrame::Refuse { rq, item, price: max_price };
            let _ = self.send(&frame).await;
        }
    }

    /// Answer one inbound transaction connection: reply to INFORM_Req, then
    /// wait for Shipping_Info or CANCEL (spec §4.5, §6).
    async fn serve_transaction(&self, stream: tokio::net::TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let StreamFrame::InformReq { tx, item, price } = StreamFrame::parse(line.trim())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?
        else {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected INFORM_Req"));
        };
        info!(%tx, %item, price, "received INFORM_Req");

        let response = StreamFrame::InformRes {
            tx,
            name: self.config.name.clone(),
            cc_number: self.billing.cc_number.clone(),
            cc_expiry: self.billing.cc_expiry.clone(),
            address: self.billing.address.clone(),
        };
        let mut out = response.to_string();
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;

        line.clear();
        reader.read_line(&mut line).await?;
        match StreamFrame::parse(line.trim()) {
            Ok(StreamFrame::ShippingInfo { tx, buyer_name, buyer_address }) => {
                info!(%tx, %buyer_name, %buyer_address, "shipment will be sent");
            }
            Ok(StreamFrame::Cancel { tx, reason }) => {
                warn!(%tx, %reason, "transaction cancelled by coordinator");
            }
            Ok(_) | Err(_) => {
                warn!(%tx, "unexpected frame after INFORM_Res");
            }
        }
        Ok(())
    }
}
