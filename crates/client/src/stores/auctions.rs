//! Live auction state store.
//!
//! The single owner of every [`AuctionLiveView`]. Only the dispatcher
//! merges into it; consumers read snapshots through a `watch` receiver.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use mzad_shared::{AuctionId, AuctionStatus, AuctionUpdatePayload, BidId, UserId};
use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of every tracked auction, keyed by id.
pub type AuctionMap = HashMap<AuctionId, AuctionLiveView>;

/// Client-side view of one auction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuctionLiveView {
    pub auction_id: AuctionId,
    pub title: Option<String>,
    pub current_price: f64,
    /// Never decreases while the process runs.
    pub total_bids: u64,
    pub last_bidder_id: Option<UserId>,
    pub last_bidder_name: Option<String>,
    pub last_bid_at: Option<DateTime<Utc>>,
    pub status: AuctionStatus,
    /// Only set once `status` is `Ended`.
    pub winner_id: Option<UserId>,
    pub final_price: Option<f64>,
    pub end_time: Option<DateTime<Utc>>,
    /// Fields the server sent that have no dedicated slot.
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Local receipt time of the last merge.
    pub last_update: DateTime<Utc>,
}

impl AuctionLiveView {
    pub fn new(auction_id: AuctionId) -> Self {
        Self {
            auction_id,
            title: None,
            current_price: 0.0,
            total_bids: 0,
            last_bidder_id: None,
            last_bidder_name: None,
            last_bid_at: None,
            status: AuctionStatus::Active,
            winner_id: None,
            final_price: None,
            end_time: None,
            attributes: serde_json::Map::new(),
            last_update: Utc::now(),
        }
    }

    /// Title, or `Auction #<id>` when the server never sent one.
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("Auction #{}", self.auction_id))
    }

    pub fn is_ended(&self) -> bool {
        self.status == AuctionStatus::Ended
    }
}

/// Partial update to an [`AuctionLiveView`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuctionPatch {
    pub title: Option<String>,
    pub current_price: Option<f64>,
    pub total_bids: Option<u64>,
    pub last_bidder_id: Option<UserId>,
    pub last_bidder_name: Option<String>,
    pub last_bid_at: Option<DateTime<Utc>>,
    pub status: Option<AuctionStatus>,
    pub winner_id: Option<UserId>,
    pub final_price: Option<f64>,
    pub end_time: Option<DateTime<Utc>>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl AuctionPatch {
    fn apply_to(self, view: &mut AuctionLiveView) {
        if let Some(title) = self.title {
            view.title = Some(title);
        }
        if let Some(price) = self.current_price {
            view.current_price = price;
        }
        if let Some(total) = self.total_bids {
            view.total_bids = view.total_bids.max(total);
        }
        // Id and name belong to the bidder they came with.
        match (self.last_bidder_id, self.last_bidder_name) {
            (Some(bidder), name) => {
                if view.last_bidder_id.as_ref() != Some(&bidder) {
                    view.last_bidder_name = None;
                }
                view.last_bidder_id = Some(bidder);
                if name.is_some() {
                    view.last_bidder_name = name;
                }
            }
            (None, Some(name)) => {
                if view.last_bidder_name.as_ref() != Some(&name) {
                    view.last_bidder_id = None;
                }
                view.last_bidder_name = Some(name);
            }
            (None, None) => {}
        }
        if let Some(at) = self.last_bid_at {
            view.last_bid_at = Some(at);
        }
        // Ended is final.
        if let Some(status) = self.status {
            if !view.is_ended() {
                view.status = status;
            }
        }
        if let Some(price) = self.final_price {
            view.final_price = Some(price);
        }
        if let Some(end) = self.end_time {
            view.end_time = Some(end);
        }
        if view.is_ended() {
            if let Some(winner) = self.winner_id {
                view.winner_id = Some(winner);
            }
        }
        view.attributes.extend(self.attributes);
        view.last_update = Utc::now();
    }
}

impl From<AuctionUpdatePayload> for AuctionPatch {
    fn from(update: AuctionUpdatePayload) -> Self {
        Self {
            title: update.title,
            current_price: update.current_price,
            total_bids: update.total_bids,
            last_bidder_id: update.last_bidder_id,
            last_bidder_name: update.last_bidder_name,
            last_bid_at: update.last_bid_time,
            status: update.status.as_deref().and_then(AuctionStatus::from_wire),
            winner_id: update.winner_id,
            final_price: update.final_price,
            end_time: update.end_time,
            attributes: update.attributes,
        }
    }
}

/// View before and after a merge. `previous` is `None` for a new auction.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub previous: Option<AuctionLiveView>,
    pub current: AuctionLiveView,
}

/// Bid ids remembered per auction for duplicate detection.
pub const SEEN_BIDS_PER_AUCTION: usize = 256;

/// Most recent bid ids of one auction. The oldest id is forgotten when full.
#[derive(Debug, Default)]
struct SeenBids {
    order: VecDeque<BidId>,
    ids: HashSet<BidId>,
}

impl SeenBids {
    fn insert(&mut self, bid_id: &BidId) -> bool {
        if !self.ids.insert(bid_id.clone()) {
            return false;
        }
        self.order.push_back(bid_id.clone());
        if self.order.len() > SEEN_BIDS_PER_AUCTION {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Owner of the auction views.
#[derive(Debug)]
pub struct AuctionStore {
    views: watch::Sender<AuctionMap>,
    /// Recently applied bid ids, per auction.
    seen_bids: HashMap<AuctionId, SeenBids>,
}

impl Default for AuctionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuctionStore {
    pub fn new() -> Self {
        let (views, _) = watch::channel(AuctionMap::new());
        Self {
            views,
            seen_bids: HashMap::new(),
        }
    }

    pub fn get(&self, auction_id: &AuctionId) -> Option<AuctionLiveView> {
        self.views.borrow().get(auction_id).cloned()
    }

    /// Merge a partial update, creating the view if the auction is new.
    pub fn merge(&mut self, auction_id: &AuctionId, patch: AuctionPatch) -> MergeOutcome {
        let previous = self.get(auction_id);
        let mut current = previous
            .clone()
            .unwrap_or_else(|| AuctionLiveView::new(auction_id.clone()));
        patch.apply_to(&mut current);

        let published = current.clone();
        self.views.send_modify(|views| {
            views.insert(auction_id.clone(), published);
        });
        MergeOutcome { previous, current }
    }

    /// Record a server bid id. Returns `false` if it was already applied.
    pub fn note_bid(&mut self, auction_id: &AuctionId, bid_id: &BidId) -> bool {
        self.seen_bids
            .entry(auction_id.clone())
            .or_default()
            .insert(bid_id)
    }

    pub fn discard(&mut self, auction_id: &AuctionId) -> Option<AuctionLiveView> {
        self.seen_bids.remove(auction_id);
        let mut removed = None;
        self.views.send_if_modified(|views| {
            removed = views.remove(auction_id);
            removed.is_some()
        });
        removed
    }

    pub fn snapshot(&self) -> AuctionMap {
        self.views.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuctionMap> {
        self.views.subscribe()
    }
}
