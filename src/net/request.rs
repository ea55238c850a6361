//! Request Table (spec §3, §4.3).
//!
//! Grounded on the teacher's `net/peer.rs` `requests_in_flight: HashMap<Hash,
//! Instant>` pattern for per-request deadline bookkeeping, and
//! `net/sync.rs`'s `OrphanPool` for the shape of a keyed table of in-flight
//! work items with their own terminal disposition.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use uuid::Uuid;

/// One seller's bid against a request (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub seller_name: String,
    pub price: f64,
    pub seller_addr: SocketAddr,
}

/// Lifecycle state of a [`RequestRecord`] (spec §4.3's canonical transition
/// table — the only edges a correct implementation may take).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Soliciting,
    Reserved,
    Negotiating,
    Completed,
    NotAvailable,
    Cancelled,
    Failed,
    RegistrationDone,
    DeregistrationDone,
}

/// Why the request left Soliciting/Negotiating/Reserved — kept for the
/// snapshot's audit trail (spec §4.4, §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    None,
    Reserved { seller: String, price: f64 },
    NotAvailable,
    NegotiationRefused,
    Cancelled,
    TransactionCompleted { transaction_id: Uuid },
    TransactionFailed { transaction_id: Uuid, reason: String },
    Registered,
    RegisterDenied { reason: String },
    Deregistered,
    DeregisterDenied { reason: String },
}

/// One buyer request's full state (spec §3).
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request_id: Uuid,
    pub buyer_name: String,
    pub item_name: String,
    pub item_description: String,
    pub max_price: f64,
    pub state: RequestState,
    /// Unique by `seller_name`, in first-arrival order (tie-break rule,
    /// spec §4.3).
    pub offers: Vec<Offer>,
    pub reservation: Option<Offer>,
    /// Set once the first OFFER arrives; the offer window expires
    /// `offer_window` later (spec §4.3).
    pub offer_gather_deadline: Option<Instant>,
    /// Set at fan-out time; `abandon_timeout` later (spec §4.3).
    pub solicit_deadline: Instant,
    pub disposition: Disposition,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl RequestRecord {
    pub fn new_soliciting(
        request_id: Uuid,
        buyer_name: String,
        item_name: String,
        item_description: String,
        max_price: f64,
        solicit_deadline: Instant,
    ) -> Self {
        Self {
            request_id,
            buyer_name,
            item_name,
            item_description,
            max_price,
            state: RequestState::Soliciting,
            offers: Vec::new(),
            reservation: None,
            offer_gather_deadline: None,
            solicit_deadline,
            disposition: Disposition::None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Terminal audit record for a REGISTER/DE-REGISTER operation (spec
    /// §4.4: "writes a RequestRecord in terminal state ... tagged with the
    /// operation").
    pub fn audit(
        request_id: Uuid,
        buyer_name: String,
        state: RequestState,
        disposition: Disposition,
    ) -> Self {
        Self {
            request_id,
            buyer_name,
            item_name: String::new(),
            item_description: String::new(),
            max_price: 0.0,
            state,
            offers: Vec::new(),
            reservation: None,
            offer_gather_deadline: None,
            solicit_deadline: Instant::now(),
            disposition,
            created_at: chrono::Utc::now(),
        }
    }

    /// Record `offer`, ignoring a second bid from a seller who already has
    /// one for this request (spec §3 invariant, §4.3 offer-collection rule).
    /// Returns `true` if the offer was appended.
    pub fn add_offer(&mut self, offer: Offer) -> bool {
        if self.offers.iter().any(|o| o.seller_name == offer.seller_name) {
            return false;
        }
        self.offers.push(offer);
        true
    }

    /// Partition recorded offers into those at-or-under `max_price` and
    /// those over, preserving arrival order within each group (spec §4.3
    /// offer-window-expiration rule 1).
    pub fn partition_offers(&self) -> (Vec<&Offer>, Vec<&Offer>) {
        self.offers.iter().partition(|o| o.price <= self.max_price)
    }
}

/// Mapping from `request_id` to [`RequestRecord`] (spec §3).
#[derive(Debug, Default)]
pub struct RequestTable {
    requests: HashMap<Uuid, RequestRecord>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self { requests: HashMap::new() }
    }

    pub fn insert(&mut self, record: RequestRecord) {
        self.requests.insert(record.request_id, record);
    }

    pub fn get(&self, rq: &Uuid) -> Option<&RequestRecord> {
        self.requests.get(rq)
    }

    pub fn get_mut(&mut self, rq: &Uuid) -> Option<&mut RequestRecord> {
        self.requests.get_mut(rq)
    }

    pub fn remove(&mut self, rq: &Uuid) -> Option<RequestRecord> {
        self.requests.remove(rq)
    }

    /// Remove every record whose buyer is `name` (spec §4.2 cascade on
    /// DE-REGISTER).
    pub fn remove_by_buyer(&mut self, name: &str) -> Vec<RequestRecord> {
        let dead: Vec<Uuid> = self
            .requests
            .iter()
            .filter(|(_, r)| r.buyer_name == name)
            .map(|(id, _)| *id)
            .collect();
        dead.into_iter()
            .filter_map(|id| self.requests.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &RequestRecord)> {
        self.requests.iter()
    }
}

/// Select the cheapest offer in `offers` by price, tie-breaking by
/// first-arrival order (spec §4.3 rule 2: "pick best = argmin(price);
/// tie-break by first-arrival order").
pub fn cheapest<'a>(offers: &[&'a Offer]) -> Option<&'a Offer> {
    offers.iter().copied().min_by(|a, b| {
        a.price
            .partial_cmp(&b.price)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(seller: &str, price: f64) -> Offer {
        Offer {
            seller_name: seller.to_string(),
            price,
            seller_addr: "127.0.0.1:1".parse().unwrap(),
        }
    }

    #[test]
    fn duplicate_offer_from_same_seller_is_rejected() {
        let mut rec = RequestRecord::new_soliciting(
            Uuid::new_v4(),
            "A".into(),
            "book".into(),
            "desc".into(),
            20.0,
            Instant::now(),
        );
        assert!(rec.add_offer(offer("B", 10.0)));
        assert!(!rec.add_offer(offer("B", 5.0)));
        assert_eq!(rec.offers.len(), 1);
        assert_eq!(rec.offers[0].price, 10.0);
    }

    #[test]
    fn partition_splits_on_max_price_inclusive() {
        let mut rec = RequestRecord::new_soliciting(
            Uuid::new_v4(),
            "A".into(),
            "book".into(),
            "desc".into(),
            20.0,
            Instant::now(),
        );
        rec.add_offer(offer("B", 20.0)); // exactly max_price: valid (<=, not <)
        rec.add_offer(offer("C", 20.01));
        let (valid, over) = rec.partition_offers();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].seller_name, "B");
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].seller_name, "C");
    }

    #[test]
    fn cheapest_ties_break_by_first_arrival() {
        let offers = vec![offer("B", 15.0), offer("C", 15.0)];
        let refs: Vec<&Offer> = offers.iter().collect();
        let picked = cheapest(&refs).unwrap();
        assert_eq!(picked.seller_name, "B");
    }

    #[test]
    fn remove_by_buyer_cascades() {
        let mut table = RequestTable::new();
        let r1 = RequestRecord::new_soliciting(
            Uuid::new_v4(), "A".into(), "x".into(), "".into(), 1.0, Instant::now(),
        );
        let r2 = RequestRecord::new_soliciting(
            Uuid::new_v4(), "B".into(), "y".into(), "".into(), 1.0, Instant::now(),
        );
        table.insert(r1);
        table.insert(r2);
        let removed = table.remove_by_buyer("A");
        assert_eq!(removed.len(), 1);
        assert_eq!(table.len(), 1);
    }
}
