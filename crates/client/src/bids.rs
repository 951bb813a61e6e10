//! Bid intents and the pending-bid list used to route `bid_confirmation`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use mzad_shared::{AuctionId, ClientCommand};
use uuid::Uuid;

use crate::error::ClientError;

/// Client-generated reference attached to a `place_bid` frame.
pub type BidRef = Uuid;

/// A validated request to bid on an auction.
#[derive(Debug, Clone, PartialEq)]
pub struct BidIntent {
    pub auction_id: AuctionId,
    pub amount: f64,
}

impl BidIntent {
    pub fn new(auction_id: impl Into<AuctionId>, amount: f64) -> Result<Self, ClientError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ClientError::InvalidAmount(amount));
        }
        Ok(Self {
            auction_id: auction_id.into(),
            amount,
        })
    }
}

/// A bid that was handed to the transport and awaits its confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBid {
    pub client_ref: BidRef,
    pub auction_id: AuctionId,
    pub amount: f64,
    pub sent_at: DateTime<Utc>,
}

impl From<BidIntent> for PendingBid {
    fn from(intent: BidIntent) -> Self {
        Self {
            client_ref: Uuid::new_v4(),
            auction_id: intent.auction_id,
            amount: intent.amount,
            sent_at: Utc::now(),
        }
    }
}

impl PendingBid {
    pub fn to_command(&self) -> ClientCommand {
        ClientCommand::PlaceBid {
            auction_id: self.auction_id.clone(),
            amount: self.amount,
            client_ref: Some(self.client_ref),
        }
    }
}

/// Bounded FIFO of bids awaiting confirmation. The oldest entry is dropped
/// when full.
#[derive(Debug)]
pub struct PendingBids {
    bids: VecDeque<PendingBid>,
    capacity: usize,
}

impl PendingBids {
    pub fn new(capacity: usize) -> Self {
        Self {
            bids: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, bid: PendingBid) -> Option<PendingBid> {
        let evicted = if self.bids.len() >= self.capacity {
            self.bids.pop_front()
        } else {
            None
        };
        self.bids.push_back(bid);
        evicted
    }

    /// Take the bid a confirmation refers to.
    ///
    /// An echoed `client_ref` must match exactly. Without one, the most
    /// recent pending bid on the same auction is taken.
    pub fn resolve(&mut self, auction_id: &AuctionId, client_ref: Option<BidRef>) -> Option<PendingBid> {
        let position = match client_ref {
            Some(client_ref) => self.bids.iter().position(|b| b.client_ref == client_ref),
            None => self.bids.iter().rposition(|b| &b.auction_id == auction_id),
        }?;
        self.bids.remove(position)
    }

    /// Take the most recent pending bid on any auction.
    pub fn take_latest(&mut self) -> Option<PendingBid> {
        self.bids.pop_back()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
    }

    pub fn len(&self) -> usize {
        self.bids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }
}
