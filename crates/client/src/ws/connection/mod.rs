//! Live connection to the auction server.
//!
//! The shared types live here. The actor that owns the socket is in
//! `connection_native`.

use std::fmt;

use futures_channel::mpsc::UnboundedSender;
use mzad_shared::{AuctionId, NotificationKind};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::auth_session::AuthSession;
use crate::bids::{BidIntent, BidRef, PendingBid};
use crate::error::ClientError;
use crate::stores::{AuctionLiveView, AuctionMap, NotificationLog};

/// Connection state of the live client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected. Either never activated, given up after the reconnect
    /// budget ran out, or closed normally by the server.
    #[default]
    Disconnected,
    /// Transport is being established.
    Connecting,
    /// Transport is up and the auth frame was sent; waiting for the first frame.
    Authenticating,
    /// Live. The only state in which bids and join/leave hints are sent.
    Connected,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting,
    /// Explicitly torn down (logout).
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// An attempt is in progress or scheduled.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Authenticating
                | ConnectionState::Reconnecting
        )
    }

    pub fn is_inactive(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Requests from handles to the connection actor.
#[derive(Debug)]
pub(crate) enum Command {
    Activate(AuthSession),
    Deactivate,
    PlaceBid(PendingBid),
    Join(AuctionId),
    Leave(AuctionId),
    MarkRead(Uuid),
    ClearNotifications,
    DiscardAuction(AuctionId),
    Shutdown,
}

/// Cloneable handle to a running [`WsConnection`].
///
/// Reads go through `watch` snapshots published by the connection task;
/// writes are queued as commands and applied by that task in order.
#[derive(Clone)]
pub struct WsHandle {
    sender: UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    auctions: watch::Receiver<AuctionMap>,
    notifications: watch::Receiver<NotificationLog>,
}

impl fmt::Debug for WsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsHandle")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl WsHandle {
    pub(crate) fn new(
        sender: UnboundedSender<Command>,
        state: watch::Receiver<ConnectionState>,
        auctions: watch::Receiver<AuctionMap>,
        notifications: watch::Receiver<NotificationLog>,
    ) -> Self {
        Self {
            sender,
            state,
            auctions,
            notifications,
        }
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.sender
            .unbounded_send(command)
            .map_err(|_| ClientError::Shutdown)
    }

    fn require_connected(&self) -> Result<(), ClientError> {
        if self.state().is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    // --- Lifecycle ---

    /// Activate the client with the given credentials.
    pub fn connect(&self, session: AuthSession) -> Result<(), ClientError> {
        self.send(Command::Activate(session))
    }

    /// Tear the session down (logout). Ends in [`ConnectionState::Closed`].
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Deactivate)
    }

    pub(crate) fn shutdown(&self) -> Result<(), ClientError> {
        self.send(Command::Shutdown)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Shutdown)
    }

    // --- Outbound ---

    /// Submit a bid. Fails with [`ClientError::NotConnected`] unless the
    /// connection is live; nothing is sent in that case.
    ///
    /// The outcome arrives later as a `bid_accepted` or `bid_rejected`
    /// notification.
    pub fn place_bid(
        &self,
        auction_id: impl Into<AuctionId>,
        amount: f64,
    ) -> Result<BidRef, ClientError> {
        let intent = BidIntent::new(auction_id, amount)?;
        self.require_connected()?;
        let pending = PendingBid::from(intent);
        let client_ref = pending.client_ref;
        self.send(Command::PlaceBid(pending))?;
        Ok(client_ref)
    }

    /// Ask the server to stream this auction. Remembered and re-sent after
    /// every reconnect.
    pub fn join_auction(&self, auction_id: impl Into<AuctionId>) -> Result<(), ClientError> {
        self.require_connected()?;
        self.send(Command::Join(auction_id.into()))
    }

    pub fn leave_auction(&self, auction_id: impl Into<AuctionId>) -> Result<(), ClientError> {
        self.require_connected()?;
        self.send(Command::Leave(auction_id.into()))
    }

    // --- Auctions ---

    pub fn auction(&self, auction_id: &AuctionId) -> Option<AuctionLiveView> {
        self.auctions.borrow().get(auction_id).cloned()
    }

    pub fn auctions(&self) -> AuctionMap {
        self.auctions.borrow().clone()
    }

    pub fn watch_auctions(&self) -> watch::Receiver<AuctionMap> {
        self.auctions.clone()
    }

    /// Drop the local view of an auction (consumer navigated away).
    pub fn discard_auction(&self, auction_id: impl Into<AuctionId>) -> Result<(), ClientError> {
        self.send(Command::DiscardAuction(auction_id.into()))
    }

    // --- Notifications ---

    pub fn notifications(&self) -> NotificationLog {
        self.notifications.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.borrow().unread_count()
    }

    /// Number of notifications of one kind currently in the log.
    pub fn count_of(&self, kind: NotificationKind) -> usize {
        self.notifications
            .borrow()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    pub fn watch_notifications(&self) -> watch::Receiver<NotificationLog> {
        self.notifications.clone()
    }

    pub fn mark_read(&self, id: Uuid) -> Result<(), ClientError> {
        self.send(Command::MarkRead(id))
    }

    pub fn clear_notifications(&self) -> Result<(), ClientError> {
        self.send(Command::ClearNotifications)
    }
}

mod connection_native;
pub use connection_native::WsConnection;
