//! Request Lifecycle Engine (spec §4.3) — the core of this crate.
//!
//! Grounded on the teacher's `net/connection.rs` (`ConnectionManager`: one
//! struct owning related tables behind a lock, exposing verb-shaped public
//! methods) generalized to the concurrency shape spec §5/§9 mandate: a
//! single mutex guards the [`PeerRegistry`] and [`RequestTable`] together,
//! never held across network I/O or `.await` on a timer. Handlers acquire
//! the lock, mutate, compute what to send, release, then send.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::net::endpoint::Endpoint;
use crate::net::message::ServerFrame;
use crate::net::orchestrator::Orchestrator;
use crate::net::registry::{DeregisterOutcome, PeerRegistry, RegisterOutcome};
use crate::net::request::{cheapest, Disposition, Offer, RequestRecord, RequestState, RequestTable};
use crate::snapshot::{Snapshot, Snapshotter};

/// The registry and request table behind one mutex (spec §4.2: "guarded by
/// a single reentrant mutex shared with the Request Table").
struct Inner {
    registry: PeerRegistry,
    requests: RequestTable,
}

/// A batch of outbound frames computed under the lock, sent after it is
/// released. Keeps I/O strictly outside the critical section (spec §4.5,
/// §9).
struct Outbound {
    to: SocketAddr,
    frame: ServerFrame,
}

pub struct Engine {
    inner: Mutex<Inner>,
    pub endpoint: Arc<Endpoint>,
    pub config: CoordinatorConfig,
    snapshotter: Snapshotter,
}

impl Engine {
    pub fn new(endpoint: Arc<Endpoint>, config: CoordinatorConfig) -> Arc<Self> {
        let snapshotter = Snapshotter::new(config.snapshot_path.clone());
        Arc::new(Self {
            inner: Mutex::new(Inner { registry: PeerRegistry::new(), requests: RequestTable::new() }),
            endpoint,
            config,
            snapshotter,
        })
    }

    async fn send_all(&self, batch: Vec<Outbound>) {
        for out in batch {
            if let Err(err) = self.endpoint.send(out.to, &out.frame).await {
                warn!(to = %out.to, frame = %out.frame, error = %err, "failed to send frame");
            }
        }
    }

    async fn persist_snapshot(&self) {
        let snapshot = {
            let inner = self.inner.lock().await;
            Snapshot::capture(&inner.registry, &inner.requests)
        };
        if let Err(err) = self.snapshotter.write(&snapshot).await {
            warn!(error = %err, "snapshot write failed");
        }
    }

    // ---- REGISTER / DE-REGISTER (spec §4.2, §4.4) -------------------------

    pub async fn handle_register(
        &self,
        rq: Uuid,
        name: String,
        src_addr: SocketAddr,
        stream_port: u16,
    ) {
        let outbound = {
            let mut inner = self.inner.lock().await;
            let outcome = inner.registry.register(&name, src_addr, stream_port, rq);
            let (frame, disposition, state) = match outcome {
                RegisterOutcome::Registered => {
                    info!(%rq, %name, %src_addr, "peer registered");
                    (
                        ServerFrame::Registered { rq },
                        Disposition::Registered,
                        RequestState::RegistrationDone,
                    )
                }
                RegisterOutcome::Denied => {
                    let reason = "name already in use".to_string();
                    warn!(%rq, %name, "registration denied: name already in use");
                    (
                        ServerFrame::RegisterDenied { rq, reason: reason.clone() },
                        Disposition::RegisterDenied { reason },
                        RequestState::RegistrationDone,
                    )
                }
            };
            inner.requests.insert(RequestRecord::audit(rq, name, state, disposition));
            Outbound { to: src_addr, frame }
        };
        self.send_all(vec![outbound]).await;
        self.persist_snapshot().await;
    }

    pub async fn handle_deregister(&self, rq: Uuid, name: String, src_addr: SocketAddr) {
        let outbound = {
            let mut inner = self.inner.lock().await;
            let outcome = inner.registry.deregister(&name);
            let (frame, disposition) = match outcome {
                DeregisterOutcome::Deregistered => {
                    // Cascade: drop every RequestRecord this peer originated
                    // as a buyer (spec §4.2). Reservations naming this peer
                    // as a *seller* are intentionally left alone — they fail
                    // lazily at transaction time (spec §9 open question).
                    let removed = inner.requests.remove_by_buyer(&name);
                    if !removed.is_empty() {
                        debug!(%name, removed = removed.len(), "cascaded buyer requests on deregister");
                    }
                    info!(%rq, %name, "peer deregistered");
                    (ServerFrame::Deregistered { rq }, Disposition::Deregistered)
                }
                DeregisterOutcome::Denied => {
                    let reason = "name not registered".to_string();
                    warn!(%rq, %name, "deregistration denied: unknown name");
                    (
                        ServerFrame::DeregisterDenied { rq, reason: reason.clone() },
                        Disposition::DeregisterDenied { reason },
                    )
                }
            };
            inner.requests.insert(RequestRecord::audit(
                rq,
                name,
                RequestState::DeregistrationDone,
                disposition,
            ));
            Outbound { to: src_addr, frame }
        };
        self.send_all(vec![outbound]).await;
        self.persist_snapshot().await;
    }

    // ---- LOOKING_FOR / OFFER (spec §4.3 entry + offer collection) --------

    pub async fn handle_looking_for(
        self: &Arc<Self>,
        rq: Uuid,
        buyer: String,
        item: String,
        description: String,
        max_price: f64,
    ) {
        let targets = {
            let mut inner = self.inner.lock().await;
            if !inner.registry.contains(&buyer) {
                warn!(%rq, %buyer, "LOOKING_FOR from unregistered buyer, dropping");
                return;
            }
            let targets = inner.registry.all_except(&buyer);
            let deadline = Instant::now() + self.config.abandon_timeout;
            let record = RequestRecord::new_soliciting(
                rq,
                buyer.clone(),
                item.clone(),
                description.clone(),
                max_price,
                deadline,
            );
            inner.requests.insert(record);
            targets
        };

        info!(%rq, %buyer, %item, max_price, targets = targets.len(), "soliciting offers");

        let batch: Vec<Outbound> = targets
            .into_iter()
            .map(|peer| Outbound {
                to: peer.datagram_addr,
                frame: ServerFrame::Search { rq, item: item.clone(), description: description.clone() },
            })
            .collect();
        self.send_all(batch).await;
        self.persist_snapshot().await;

        let engine = self.clone();
        let abandon_timeout = self.config.abandon_timeout;
        tokio::spawn(async move {
            sleep(abandon_timeout).await;
            engine.fire_abandon(rq).await;
        });
    }

    pub async fn handle_offer(self: &Arc<Self>, rq: Uuid, seller: String, price: f64, src_addr: SocketAddr) {
        let start_offer_window = {
            let mut inner = self.inner.lock().await;
            let Some(record) = inner.requests.get_mut(&rq) else {
                debug!(%rq, %seller, "OFFER for unknown request, dropping");
                return;
            };
            if record.state != RequestState::Soliciting {
                debug!(%rq, %seller, state = ?record.state, "OFFER outside Soliciting, dropping");
                return;
            }
            let added = record.add_offer(Offer { seller_name: seller.clone(), price, seller_addr: src_addr });
            if !added {
                debug!(%rq, %seller, "duplicate OFFER from seller, ignoring");
                return;
            }
            debug!(%rq, %seller, price, "offer recorded");
            if record.offer_gather_deadline.is_none() {
                record.offer_gather_deadline = Some(Instant::now() + self.config.offer_window);
                true
            } else {
                false
            }
        };

        if start_offer_window {
            let engine = self.clone();
            let offer_window = self.config.offer_window;
            tokio::spawn(async move {
                sleep(offer_window).await;
                engine.fire_offer_window(rq).await;
            });
        }
        self.persist_snapshot().await;
    }

    // ---- Offer window / abandon timers (spec §4.3, §9) --------------------

    pub async fn fire_offer_window(self: &Arc<Self>, rq: Uuid) {
        let outcome = {
            let mut inner = self.inner.lock().await;

            // Snapshot what we need out of the record first so the
            // registry-membership filter below doesn't have to fight a live
            // mutable borrow of `inner.requests` (disjoint-field borrows of
            // `inner.requests` and `inner.registry` only work when neither
            // side outlives its actual use).
            let (valid, over, buyer_name, item, max_price) = {
                let Some(record) = inner.requests.get(&rq) else { return };
                if record.state != RequestState::Soliciting {
                    return;
                }
                let (v, o) = record.partition_offers();
                (
                    v.into_iter().cloned().collect::<Vec<Offer>>(),
                    o.into_iter().cloned().collect::<Vec<Offer>>(),
                    record.buyer_name.clone(),
                    record.item_name.clone(),
                    record.max_price,
                )
            };

            // Invariant 3: a seller must still be registered at the moment
            // of transition to Reserved.
            let live_valid: Vec<Offer> =
                valid.into_iter().filter(|o| inner.registry.contains(&o.seller_name)).collect();
            let refs: Vec<&Offer> = live_valid.iter().collect();
            let best = cheapest(&refs).cloned();

            let live_over: Vec<Offer> =
                over.into_iter().filter(|o| inner.registry.contains(&o.seller_name)).collect();
            let refs: Vec<&Offer> = live_over.iter().collect();
            let neg_target = cheapest(&refs).cloned();

            let record = inner.requests.get_mut(&rq).expect("checked present above");

            if let Some(best) = best {
                record.reservation = Some(best.clone());
                record.state = RequestState::Reserved;
                record.disposition = Disposition::Reserved { seller: best.seller_name.clone(), price: best.price };
                info!(%rq, seller = %best.seller_name, price = best.price, "reserved cheapest valid offer");
                let buyer_addr = inner.registry.lookup(&buyer_name).map(|p| p.datagram_addr);
                let seller_addr = inner.registry.lookup(&best.seller_name).map(|p| p.datagram_addr);
                Some(FireOutcome::Reserved { buyer_addr, seller_addr, item, best })
            } else if let Some(neg_target) = neg_target {
                record.state = RequestState::Negotiating;
                info!(%rq, seller = %neg_target.seller_name, "negotiating with cheapest over-price offer");
                Some(FireOutcome::Negotiating { seller_addr: neg_target.seller_addr, item, max_price })
            } else {
                record.state = RequestState::NotAvailable;
                record.disposition = Disposition::NotAvailable;
                info!(%rq, "offer window expired with no usable offers");
                let buyer_addr = inner.registry.lookup(&buyer_name).map(|p| p.datagram_addr);
                Some(FireOutcome::NotAvailable { buyer_addr, item, max_price })
            }
        };

        let batch = match outcome {
            Some(FireOutcome::Reserved { buyer_addr, seller_addr, item, best }) => {
                let mut batch = Vec::new();
                if let Some(addr) = buyer_addr {
                    batch.push(Outbound {
                        to: addr,
                        frame: ServerFrame::Found {
                            rq,
                            item: item.clone(),
                            price: best.price,
                            seller: best.seller_name.clone(),
                        },
                    });
                }
                if let Some(addr) = seller_addr {
                    batch.push(Outbound { to: addr, frame: ServerFrame::Reserve { rq, item, price: best.price } });
                }
                batch
            }
            Some(FireOutcome::Negotiating { seller_addr, item, max_price }) => {
                vec![Outbound { to: seller_addr, frame: ServerFrame::Negotiate { rq, item, max_price } }]
            }
            Some(FireOutcome::NotAvailable { buyer_addr, item, max_price }) => buyer_addr
                .map(|addr| vec![Outbound { to: addr, frame: ServerFrame::NotAvailable { rq, item, max_price } }])
                .unwrap_or_default(),
            None => Vec::new(),
        };
        self.send_all(batch).await;
        self.persist_snapshot().await;
    }

    pub async fn fire_abandon(self: &Arc<Self>, rq: Uuid) {
        let outbound = {
            let mut inner = self.inner.lock().await;
            let Some(record) = inner.requests.get_mut(&rq) else { return };
            if record.state != RequestState::Soliciting || !record.offers.is_empty() {
                return;
            }
            record.state = RequestState::NotAvailable;
            record.disposition = Disposition::NotAvailable;
            info!(%rq, "abandoned: no offers within T_abandon");
            let buyer_addr = inner.registry.lookup(&record.buyer_name).map(|p| p.datagram_addr);
            buyer_addr.map(|addr| Outbound {
                to: addr,
                frame: ServerFrame::NotAvailable { rq, item: record.item_name.clone(), max_price: record.max_price },
            })
        };
        self.send_all(outbound.into_iter().collect()).await;
        self.persist_snapshot().await;
    }

    // ---- Negotiation (spec §4.3) ------------------------------------------

    pub async fn handle_accept(&self, rq: Uuid, max_price: f64, src_addr: SocketAddr) {
        let outbound = {
            let mut inner = self.inner.lock().await;
            let Some(record) = inner.requests.get_mut(&rq) else {
                debug!(%rq, "ACCEPT for unknown request, dropping");
                return;
            };
            if record.state != RequestState::Negotiating {
                debug!(%rq, state = ?record.state, "ACCEPT outside Negotiating, dropping");
                return;
            }
            let Some(pos) = record.offers.iter().position(|o| o.seller_addr == src_addr) else {
                debug!(%rq, %src_addr, "ACCEPT from unmatched address, dropping");
                return;
            };
            let seller_name = record.offers[pos].seller_name.clone();
            // Invariant 3: a seller must still be registered at the moment
            // of transition to Reserved (spec.md:49, 198) — not just on the
            // fire_offer_window path.
            if !inner.registry.contains(&seller_name) {
                debug!(%rq, seller = %seller_name, "ACCEPT from deregistered seller, dropping");
                return;
            }
            let matched = &mut record.offers[pos];
            matched.price = max_price;
            let reservation = matched.clone();
            record.reservation = Some(reservation.clone());
            record.state = RequestState::Reserved;
            record.disposition =
                Disposition::Reserved { seller: reservation.seller_name.clone(), price: reservation.price };
            info!(%rq, seller = %reservation.seller_name, price = max_price, "negotiation accepted");
            let buyer_addr = inner.registry.lookup(&record.buyer_name).map(|p| p.datagram_addr);
            let item = record.item_name.clone();
            buyer_addr.map(|addr| Outbound {
                to: addr,
                frame: ServerFrame::Found { rq, item, price: max_price, seller: reservation.seller_name },
            })
        };
        self.send_all(outbound.into_iter().collect()).await;
        self.persist_snapshot().await;
    }

    pub async fn handle_refuse(&self, rq: Uuid, max_price: f64) {
        let outbound = {
            let mut inner = self.inner.lock().await;
            let Some(record) = inner.requests.get_mut(&rq) else {
                debug!(%rq, "REFUSE for unknown request, dropping");
                return;
            };
            if record.state != RequestState::Negotiating {
                debug!(%rq, state = ?record.state, "REFUSE outside Negotiating, dropping");
                return;
            }
            record.state = RequestState::Failed;
            record.disposition = Disposition::NegotiationRefused;
            info!(%rq, "negotiation refused");
            let buyer_addr = inner.registry.lookup(&record.buyer_name).map(|p| p.datagram_addr);
            let item = record.item_name.clone();
            buyer_addr.map(|addr| Outbound { to: addr, frame: ServerFrame::NotFound { rq, item, max_price } })
        };
        self.send_all(outbound.into_iter().collect()).await;
        self.persist_snapshot().await;
    }

    // ---- Buyer CANCEL / BUY (spec §4.3, §4.5) ------------------------------

    pub async fn handle_cancel(&self, rq: Uuid, price: f64) {
        let outbound = {
            let mut inner = self.inner.lock().await;
            let Some(record) = inner.requests.get_mut(&rq) else {
                debug!(%rq, "CANCEL for unknown request, dropping");
                return;
            };
            if record.state != RequestState::Reserved {
                debug!(%rq, state = ?record.state, "CANCEL outside Reserved, dropping");
                return;
            }
            let Some(reservation) = record.reservation.take() else { return };
            record.state = RequestState::Cancelled;
            record.disposition = Disposition::Cancelled;
            info!(%rq, seller = %reservation.seller_name, "buyer cancelled reservation");
            let seller_addr = inner.registry.lookup(&reservation.seller_name).map(|p| p.datagram_addr);
            let item = record.item_name.clone();
            seller_addr.map(|addr| Outbound { to: addr, frame: ServerFrame::Cancel { rq, item, price } })
        };
        self.send_all(outbound.into_iter().collect()).await;
        self.persist_snapshot().await;
    }

    pub async fn handle_buy(self: &Arc<Self>, rq: Uuid, price: f64) {
        let handoff = {
            let inner = self.inner.lock().await;
            let Some(record) = inner.requests.get(&rq) else {
                debug!(%rq, "BUY for unknown request, dropping");
                return;
            };
            if record.state != RequestState::Reserved {
                debug!(%rq, state = ?record.state, "BUY outside Reserved, dropping");
                return;
            }
            let Some(reservation) = record.reservation.clone() else { return };
            let buyer = inner.registry.lookup(&record.buyer_name).cloned();
            let seller = inner.registry.lookup(&reservation.seller_name).cloned();
            (buyer, seller, record.item_name.clone())
        };
        let (buyer, seller, item) = handoff;
        let (Some(buyer), Some(seller)) = (buyer, seller) else {
            // Documented behavior: a reservation naming a since-deregistered
            // seller (or a buyer who vanished) fails lazily here rather than
            // being proactively cancelled (spec §9 open question).
            warn!(%rq, "BUY cannot proceed: buyer or seller no longer registered");
            self.fail_transaction(rq, Uuid::new_v4(), "party no longer registered".to_string()).await;
            return;
        };
        let transaction_id = Uuid::new_v4();
        info!(%rq, %transaction_id, buyer = %buyer.name, seller = %seller.name, price, "handing off to transaction orchestrator");
        let engine = self.clone();
        let io_timeout = self.config.transaction_io_timeout;
        tokio::spawn(async move {
            Orchestrator::run(engine, rq, transaction_id, buyer, seller, item, price, io_timeout).await;
        });
    }

    // ---- Orchestrator callbacks (spec §4.5) --------------------------------

    pub async fn complete_transaction(&self, rq: Uuid, transaction_id: Uuid) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(record) = inner.requests.get_mut(&rq) {
                record.state = RequestState::Completed;
                record.disposition = Disposition::TransactionCompleted { transaction_id };
            }
        }
        info!(%rq, %transaction_id, "transaction completed");
        self.persist_snapshot().await;
    }

    pub async fn fail_transaction(&self, rq: Uuid, transaction_id: Uuid, reason: String) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(record) = inner.requests.get_mut(&rq) {
                record.state = RequestState::Failed;
                record.disposition = Disposition::TransactionFailed { transaction_id, reason: reason.clone() };
            }
        }
        warn!(%rq, %transaction_id, %reason, "transaction failed");
        self.persist_snapshot().await;
    }

    /// Test/introspection helper: number of currently registered peers.
    pub async fn peer_count(&self) -> usize {
        self.inner.lock().await.registry.len()
    }

    /// Test/introspection helper: current state of a request, if it exists.
    pub async fn request_state(&self, rq: &Uuid) -> Option<RequestState> {
        self.inner.lock().await.requests.get(rq).map(|r| r.state)
    }

    /// Test/introspection helper: the winning offer reserved for a request, if any.
    pub async fn reservation(&self, rq: &Uuid) -> Option<Offer> {
        self.inner.lock().await.requests.get(rq).and_then(|r| r.reservation.clone())
    }
}

enum FireOutcome {
    Reserved { buyer_addr: Option<SocketAddr>, seller_addr: Option<SocketAddr>, item: String, best: Offer },
    Negotiating { seller_addr: SocketAddr, item: String, max_price: f64 },
    NotAvailable { buyer_addr: Option<SocketAddr>, item: String, max_price: f64 },
}
