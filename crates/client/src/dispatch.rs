//! Inbound message dispatcher.
//!
//! Decodes each text frame and routes it to the one handler for its kind.
//! Handlers merge into the [`AuctionStore`] and synthesize notifications.
//! Frames are handled one at a time, in arrival order.

use chrono::Utc;
use mzad_shared::{
    AuctionEndedPayload, AuctionExtendedPayload, AuctionStatus, BidConfirmationPayload,
    BidErrorPayload, Inbound,
    NewBidPayload, NotificationKind, NotificationPayload, OutbidNoticePayload, ServerEvent, UserId,
};
use tracing::{debug, info, warn};

use crate::bids::{PendingBid, PendingBids};
use crate::stores::{AuctionPatch, AuctionStore, Notification, NotificationCenter};

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Applied,
    /// Re-delivery of an event that was already applied.
    Duplicate,
    /// `bid_confirmation` or `bid_error` matching no pending bid.
    Uncorrelated,
    Unrecognized,
    /// Not valid JSON, or a payload that does not fit its kind.
    Dropped,
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("${amount:.0}")
    } else {
        format!("${amount:.2}")
    }
}

/// Identity of the logged-in user, matched against bidders and winners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: UserId,
    pub username: String,
}

impl LocalUser {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }

    /// Compare by id when the bidder has one, by name otherwise.
    fn is(&self, id: Option<&UserId>, name: Option<&str>) -> bool {
        match (id, name) {
            (Some(id), _) => *id == self.id,
            (None, Some(name)) => name == self.username,
            (None, None) => false,
        }
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    store: AuctionStore,
    notifications: NotificationCenter,
    pending: PendingBids,
    local_user: Option<LocalUser>,
}

impl Dispatcher {
    pub fn new(notification_capacity: usize, pending_capacity: usize) -> Self {
        Self {
            store: AuctionStore::new(),
            notifications: NotificationCenter::new(notification_capacity),
            pending: PendingBids::new(pending_capacity),
            local_user: None,
        }
    }

    pub fn store(&self) -> &AuctionStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AuctionStore {
        &mut self.store
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationCenter {
        &mut self.notifications
    }

    pub fn pending_bids(&self) -> usize {
        self.pending.len()
    }

    /// User whose bids and wins trigger outbid / auction_won notifications.
    pub fn set_local_user(&mut self, user: Option<LocalUser>) {
        self.local_user = user;
    }

    fn is_local(&self, id: Option<&UserId>, name: Option<&str>) -> bool {
        self.local_user.as_ref().is_some_and(|me| me.is(id, name))
    }

    /// Remember a bid that was just written to the transport.
    pub fn record_sent_bid(&mut self, bid: PendingBid) {
        if let Some(evicted) = self.pending.push(bid) {
            debug!(auction_id = %evicted.auction_id, client_ref = %evicted.client_ref, "pending bid evicted unconfirmed");
        }
    }

    /// Forget everything tied to the current session.
    pub fn reset_session(&mut self) {
        self.pending.clear();
    }

    /// Decode and dispatch one text frame. Never fails: bad frames are
    /// logged and dropped without touching state.
    pub fn handle_frame(&mut self, text: &str) -> Dispatched {
        match ServerEvent::decode(text) {
            Ok(Inbound::Event(event)) => self.dispatch(event),
            Ok(Inbound::Unrecognized(kind)) => {
                debug!(kind = %kind, "ignoring unrecognized message kind");
                Dispatched::Unrecognized
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind().unwrap_or("?"), "dropping malformed frame");
                Dispatched::Dropped
            }
        }
    }

    pub fn dispatch(&mut self, event: ServerEvent) -> Dispatched {
        match event {
            ServerEvent::AuctionUpdate(update) => {
                let auction_id = update.id.clone();
                self.store.merge(&auction_id, AuctionPatch::from(update));
                Dispatched::Applied
            }
            ServerEvent::NewBid(bid) => self.on_new_bid(bid),
            ServerEvent::AuctionEnded(ended) => self.on_auction_ended(ended),
            ServerEvent::BidConfirmation(confirmation) => self.on_bid_confirmation(confirmation),
            ServerEvent::BidError(error) => self.on_bid_error(error),
            ServerEvent::Notification(payload) => self.on_notification(payload),
            ServerEvent::OutbidNotification(notice) => self.on_outbid_notice(notice),
            ServerEvent::AuctionExtended(extended) => self.on_auction_extended(extended),
        }
    }

    fn on_new_bid(&mut self, bid: NewBidPayload) -> Dispatched {
        if let Some(bid_id) = &bid.bid_id {
            if !self.store.note_bid(&bid.auction_id, bid_id) {
                debug!(auction_id = %bid.auction_id, bid_id = %bid_id, "duplicate new_bid ignored");
                return Dispatched::Duplicate;
            }
        }

        let previous = self.store.get(&bid.auction_id);
        let previous_total = previous.as_ref().map_or(0, |v| v.total_bids);
        let was_leading = previous.as_ref().is_some_and(|v| {
            self.is_local(v.last_bidder_id.as_ref(), v.last_bidder_name.as_deref())
        });
        let own_bid = self.is_local(bid.bidder_id.as_ref(), bid.bidder_name.as_deref());

        let outcome = self.store.merge(
            &bid.auction_id,
            AuctionPatch {
                current_price: Some(bid.amount),
                total_bids: Some(bid.total_bids.unwrap_or(previous_total + 1)),
                last_bidder_id: bid.bidder_id,
                last_bidder_name: bid.bidder_name,
                last_bid_at: Some(bid.timestamp.unwrap_or_else(Utc::now)),
                ..Default::default()
            },
        );

        let outbid = was_leading && !own_bid;
        if outbid {
            info!(auction_id = %bid.auction_id, amount = bid.amount, "local user outbid");
            self.notifications.add(
                Notification::new(
                    NotificationKind::Outbid,
                    "You've been outbid",
                    format!(
                        "Someone placed a higher bid of {} on {}",
                        format_amount(bid.amount),
                        outcome.current.display_name()
                    ),
                )
                .for_auction(bid.auction_id),
            );
        }
        Dispatched::Applied
    }

    fn on_auction_ended(&mut self, ended: AuctionEndedPayload) -> Dispatched {
        let repeated = self
            .store
            .get(&ended.auction_id)
            .is_some_and(|v| v.is_ended() && v.winner_id == ended.winner_id);

        let outcome = self.store.merge(
            &ended.auction_id,
            AuctionPatch {
                status: Some(AuctionStatus::Ended),
                winner_id: ended.winner_id.clone(),
                final_price: ended.final_price,
                total_bids: ended.total_bids,
                ..Default::default()
            },
        );
        if repeated {
            debug!(auction_id = %ended.auction_id, "auction_ended re-delivered");
            return Dispatched::Duplicate;
        }
        info!(auction_id = %ended.auction_id, winner_id = ?ended.winner_id.as_ref().map(|w| w.as_str()), "auction ended");

        if ended
            .winner_id
            .as_ref()
            .is_some_and(|w| self.is_local(Some(w), None))
        {
            let price = ended
                .final_price
                .or(outcome.current.final_price)
                .unwrap_or(outcome.current.current_price);
            self.notifications.add(
                Notification::new(
                    NotificationKind::AuctionWon,
                    "Auction won",
                    format!(
                        "Congratulations! You won {} for {}",
                        outcome.current.display_name(),
                        format_amount(price)
                    ),
                )
                .for_auction(ended.auction_id),
            );
        }
        Dispatched::Applied
    }

    fn on_bid_confirmation(&mut self, confirmation: BidConfirmationPayload) -> Dispatched {
        let Some(bid) = self
            .pending
            .resolve(&confirmation.auction_id, confirmation.client_ref)
        else {
            warn!(
                auction_id = %confirmation.auction_id,
                client_ref = ?confirmation.client_ref,
                "bid_confirmation matches no pending bid, dropped"
            );
            return Dispatched::Uncorrelated;
        };

        let amount = format_amount(confirmation.amount.unwrap_or(bid.amount));
        let notification = if confirmation.success {
            Notification::new(
                NotificationKind::BidAccepted,
                "Bid placed",
                confirmation
                    .message
                    .unwrap_or_else(|| format!("Your bid of {amount} was placed")),
            )
        } else {
            Notification::new(
                NotificationKind::BidRejected,
                "Bid rejected",
                confirmation
                    .message
                    .unwrap_or_else(|| format!("Your bid of {amount} was rejected")),
            )
        };
        debug!(
            auction_id = %bid.auction_id,
            client_ref = %bid.client_ref,
            success = confirmation.success,
            "bid confirmed"
        );
        self.notifications
            .add(notification.for_auction(bid.auction_id));
        Dispatched::Applied
    }

    fn on_bid_error(&mut self, error: BidErrorPayload) -> Dispatched {
        let bid = match &error.auction_id {
            Some(auction_id) => self.pending.resolve(auction_id, None),
            None => self.pending.take_latest(),
        };
        let Some(bid) = bid else {
            warn!(message = ?error.message, "bid_error matches no pending bid, dropped");
            return Dispatched::Uncorrelated;
        };

        debug!(auction_id = %bid.auction_id, client_ref = %bid.client_ref, "bid rejected");
        let message = error.message.unwrap_or_else(|| {
            format!("Your bid of {} was rejected", format_amount(bid.amount))
        });
        self.notifications.add(
            Notification::new(NotificationKind::BidRejected, "Bid rejected", message)
                .for_auction(bid.auction_id),
        );
        Dispatched::Applied
    }

    fn on_notification(&mut self, payload: NotificationPayload) -> Dispatched {
        self.notifications.add(Notification::from(payload));
        Dispatched::Applied
    }

    fn on_outbid_notice(&mut self, notice: OutbidNoticePayload) -> Dispatched {
        let name = notice.auction_title.unwrap_or_else(|| {
            self.store
                .get(&notice.auction_id)
                .map(|v| v.display_name())
                .unwrap_or_else(|| format!("Auction #{}", notice.auction_id))
        });
        self.notifications.add(
            Notification::new(
                NotificationKind::Outbid,
                "You've been outbid",
                format!("Someone placed a higher bid on {name}"),
            )
            .for_auction(notice.auction_id),
        );
        Dispatched::Applied
    }

    fn on_auction_extended(&mut self, extended: AuctionExtendedPayload) -> Dispatched {
        let Some(end_time) = extended.new_end_time else {
            warn!(auction_id = %extended.auction_id, "auction_extended without a usable end time");
            return Dispatched::Dropped;
        };
        info!(
            auction_id = %extended.auction_id,
            end_time = %end_time,
            extension_secs = ?extended.extension_time,
            "auction extended"
        );
        self.store.merge(
            &extended.auction_id,
            AuctionPatch {
                end_time: Some(end_time),
                ..Default::default()
            },
        );
        Dispatched::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::BidIntent;
    use mzad_shared::AuctionId;
    use serde_json::json;

    fn dispatcher(local: &str) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(50, 32);
        dispatcher.set_local_user(Some(LocalUser::new(local, "nour")));
        dispatcher
    }

    fn frame(kind: &str, payload: serde_json::Value) -> String {
        json!({"type": kind, "payload": payload}).to_string()
    }

    fn a1() -> AuctionId {
        AuctionId::from("A1")
    }

    fn seed(dispatcher: &mut Dispatcher, price: f64, total: u64, bidder: Option<&str>) {
        let mut payload = json!({"auction_id": "A1", "current_price": price, "total_bids": total});
        if let Some(bidder) = bidder {
            payload["last_bidder_id"] = json!(bidder);
        }
        assert_eq!(
            dispatcher.handle_frame(&frame("auction_update", payload)),
            Dispatched::Applied
        );
    }

    fn count(dispatcher: &Dispatcher, kind: NotificationKind) -> usize {
        dispatcher
            .notifications()
            .snapshot()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    #[test]
    fn new_bid_updates_price_count_and_bidder() {
        let mut d = dispatcher("U1");
        seed(&mut d, 100.0, 3, None);

        d.handle_frame(&frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 120, "bidder_id": "U2"}),
        ));

        let view = d.store().get(&a1()).unwrap();
        assert_eq!(view.current_price, 120.0);
        assert_eq!(view.total_bids, 4);
        assert_eq!(view.last_bidder_id, Some(UserId::from("U2")));
        assert!(d.notifications().snapshot().is_empty());
    }

    #[test]
    fn outbid_fires_once_when_local_user_loses_lead() {
        let mut d = dispatcher("U1");
        seed(&mut d, 100.0, 3, Some("U1"));

        d.handle_frame(&frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 120, "bidder_id": "U2"}),
        ));
        d.handle_frame(&frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 130, "bidder_id": "U3"}),
        ));

        let log = d.notifications().snapshot();
        assert_eq!(count(&d, NotificationKind::Outbid), 1);
        let outbid = log.latest().unwrap();
        assert_eq!(outbid.auction_id, Some(a1()));
        assert!(!outbid.read);
    }

    #[test]
    fn own_follow_up_bid_is_not_outbid() {
        let mut d = dispatcher("U1");
        seed(&mut d, 100.0, 3, Some("U1"));
        d.handle_frame(&frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 120, "bidder_id": "U1"}),
        ));
        assert_eq!(count(&d, NotificationKind::Outbid), 0);
    }

    #[test]
    fn name_only_bids_update_view_and_detect_outbid() {
        let mut d = dispatcher("U1");
        d.handle_frame(&frame(
            "auction_update",
            json!({"auction_id": 5, "title": "Oud", "current_price": 100, "total_bids": 3, "last_bidder": "nour"}),
        ));

        let bid = frame(
            "new_bid",
            json!({
                "auction_id": 5,
                "bid_id": 11,
                "amount": 120.0,
                "bidder_name": "sara",
                "timestamp": "2024-03-01T10:00:00.000000",
                "total_bids": 4,
                "unique_bidders": 2
            }),
        );
        assert_eq!(d.handle_frame(&bid), Dispatched::Applied);

        let view = d.store().get(&AuctionId::from("5")).unwrap();
        assert_eq!(view.current_price, 120.0);
        assert_eq!(view.total_bids, 4);
        assert_eq!(view.last_bidder_name.as_deref(), Some("sara"));
        assert!(view.last_bidder_id.is_none());

        let log = d.notifications().snapshot();
        let outbid = log.latest().unwrap();
        assert_eq!(outbid.kind, NotificationKind::Outbid);
        assert_eq!(outbid.message, "Someone placed a higher bid of $120 on Oud");
    }

    #[test]
    fn own_name_only_bid_is_not_outbid() {
        let mut d = dispatcher("U1");
        seed(&mut d, 100.0, 3, Some("U1"));
        d.handle_frame(&frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 120, "bidder_name": "nour"}),
        ));
        d.handle_frame(&frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 130, "bidder_name": "nour"}),
        ));
        assert_eq!(d.store().get(&a1()).unwrap().total_bids, 5);
        assert_eq!(count(&d, NotificationKind::Outbid), 0);
    }

    #[test]
    fn duplicate_bid_ids_are_ignored() {
        let mut d = dispatcher("U1");
        seed(&mut d, 100.0, 3, Some("U1"));
        let bid = frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 120, "bidder_id": "U2", "bid_id": 9}),
        );

        assert_eq!(d.handle_frame(&bid), Dispatched::Applied);
        assert_eq!(d.handle_frame(&bid), Dispatched::Duplicate);
        assert_eq!(d.store().get(&a1()).unwrap().total_bids, 4);
        assert_eq!(count(&d, NotificationKind::Outbid), 1);
    }

    #[test]
    fn server_total_is_max_combined() {
        let mut d = dispatcher("U1");
        seed(&mut d, 100.0, 10, None);
        // Late bid carrying an older count.
        d.handle_frame(&frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 90, "bidder_id": "U2", "total_bids": 6}),
        ));
        assert_eq!(d.store().get(&a1()).unwrap().total_bids, 10);

        d.handle_frame(&frame(
            "new_bid",
            json!({"auction_id": "A1", "amount": 150, "bidder_id": "U3", "total_bids": 12}),
        ));
        assert_eq!(d.store().get(&a1()).unwrap().total_bids, 12);
    }

    #[test]
    fn auction_won_for_local_winner_only_once() {
        let mut d = dispatcher("U1");
        seed(&mut d, 100.0, 3, Some("U1"));
        let ended = frame(
            "auction_ended",
            json!({"auction_id": "A1", "winner_id": "U1", "final_price": 100}),
        );

        assert_eq!(d.handle_frame(&ended), Dispatched::Applied);
        assert_eq!(d.handle_frame(&ended), Dispatched::Duplicate);

        let view = d.store().get(&a1()).unwrap();
        assert_eq!(view.status, AuctionStatus::Ended);
        assert_eq!(view.winner_id, Some(UserId::from("U1")));
        assert_eq!(view.final_price, Some(100.0));
        assert_eq!(count(&d, NotificationKind::AuctionWon), 1);
    }

    #[test]
    fn auction_ended_for_someone_else_is_silent() {
        let mut d = dispatcher("U1");
        d.handle_frame(&frame(
            "auction_ended",
            json!({"auction_id": "A1", "winner_id": "U2", "final_price": 300}),
        ));
        assert!(d.store().get(&a1()).unwrap().is_ended());
        assert!(d.notifications().snapshot().is_empty());
    }

    #[test]
    fn confirmation_routes_to_pending_bid() {
        let mut d = dispatcher("U1");
        let bid = PendingBid::from(BidIntent::new("A1", 120.0).unwrap());
        let client_ref = bid.client_ref;
        d.record_sent_bid(bid);

        let accepted = frame(
            "bid_confirmation",
            json!({"auction_id": "A1", "success": true, "client_ref": client_ref}),
        );
        assert_eq!(d.handle_frame(&accepted), Dispatched::Applied);
        let log = d.notifications().snapshot();
        let note = log.latest().unwrap();
        assert_eq!(note.kind, NotificationKind::BidAccepted);
        assert_eq!(note.message, "Your bid of $120 was placed");
        assert_eq!(d.pending_bids(), 0);

        // Same confirmation again has nothing left to match.
        assert_eq!(d.handle_frame(&accepted), Dispatched::Uncorrelated);
    }

    #[test]
    fn rejection_without_ref_uses_latest_bid_on_auction() {
        let mut d = dispatcher("U1");
        d.record_sent_bid(PendingBid::from(BidIntent::new("A1", 50.0).unwrap()));

        d.handle_frame(&frame(
            "bid_confirmation",
            json!({"auction_id": "A1", "success": false, "message": "Bid too low"}),
        ));
        let log = d.notifications().snapshot();
        let note = log.latest().unwrap();
        assert_eq!(note.kind, NotificationKind::BidRejected);
        assert_eq!(note.message, "Bid too low");
    }

    #[test]
    fn bid_error_rejects_latest_pending_bid() {
        let mut d = dispatcher("U1");
        d.record_sent_bid(PendingBid::from(BidIntent::new("A1", 50.0).unwrap()));
        d.record_sent_bid(PendingBid::from(BidIntent::new("A2", 75.0).unwrap()));

        let error = frame("bid_error", json!({"message": "Failed to place bid"}));
        assert_eq!(d.handle_frame(&error), Dispatched::Applied);
        let log = d.notifications().snapshot();
        let note = log.latest().unwrap();
        assert_eq!(note.kind, NotificationKind::BidRejected);
        assert_eq!(note.message, "Failed to place bid");
        assert_eq!(note.auction_id, Some(AuctionId::from("A2")));
        assert_eq!(d.pending_bids(), 1);

        assert_eq!(d.handle_frame(&error), Dispatched::Applied);
        assert_eq!(d.handle_frame(&error), Dispatched::Uncorrelated);
        assert_eq!(count(&d, NotificationKind::BidRejected), 2);
    }

    #[test]
    fn unmatched_confirmation_is_dropped() {
        let mut d = dispatcher("U1");
        let out = d.handle_frame(&frame(
            "bid_confirmation",
            json!({"auction_id": "A1", "success": true}),
        ));
        assert_eq!(out, Dispatched::Uncorrelated);
        assert!(d.notifications().snapshot().is_empty());
    }

    #[test]
    fn notification_and_outbid_notice_are_logged() {
        let mut d = dispatcher("U1");
        d.handle_frame(&frame(
            "notification",
            json!({"type": "system", "title": "Maintenance", "message": "Tonight at 2am"}),
        ));
        d.handle_frame(&frame(
            "outbid_notification",
            json!({"auction_id": 7, "auction_title": "Oud"}),
        ));

        let log = d.notifications().snapshot();
        assert_eq!(log.len(), 2);
        let latest = log.latest().unwrap();
        assert_eq!(latest.kind, NotificationKind::Outbid);
        assert_eq!(latest.message, "Someone placed a higher bid on Oud");
        assert_eq!(count(&d, NotificationKind::Generic), 1);
    }

    #[test]
    fn auction_extended_moves_end_time() {
        let mut d = dispatcher("U1");
        d.handle_frame(&frame(
            "auction_extended",
            json!({"auction_id": "A1", "new_end_time": "2024-03-01T10:05:00", "extension_time": 300}),
        ));
        let view = d.store().get(&a1()).unwrap();
        assert_eq!(
            view.end_time,
            mzad_shared::timestamp::parse("2024-03-01T10:05:00Z")
        );
    }

    #[test]
    fn bad_frames_leave_state_untouched() {
        let mut d = dispatcher("U1");
        seed(&mut d, 100.0, 3, None);
        let before = d.store().snapshot();

        assert_eq!(d.handle_frame("{not json"), Dispatched::Dropped);
        assert_eq!(
            d.handle_frame(&frame("new_bid", json!({"auction_id": "A1"}))),
            Dispatched::Dropped
        );
        assert_eq!(
            d.handle_frame(&frame("chat_message", json!({}))),
            Dispatched::Unrecognized
        );
        assert_eq!(d.store().snapshot(), before);
    }

    #[test]
    fn out_of_order_bids_never_regress_count() {
        let mut d = dispatcher("U1");
        for (id, total) in [(3, 3), (1, 1), (2, 2), (4, 4)] {
            d.handle_frame(&frame(
                "new_bid",
                json!({"auction_id": "A1", "amount": 100 + id, "bidder_id": "U2", "bid_id": id, "total_bids": total}),
            ));
        }
        assert_eq!(d.store().get(&a1()).unwrap().total_bids, 4);
    }
}
