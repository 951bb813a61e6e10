//! Mzad Live - real-time auction sync client
//!
//! Keeps one WebSocket session to the auction server alive, mirrors live
//! auction state locally, turns server events into user notifications and
//! submits bids.

pub mod auth_session;
pub mod bids;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod stores;
pub mod ws;

pub use auth_session::{follow_session, AuthSession, SessionContext};
pub use bids::{BidIntent, BidRef};
pub use config::{ClientConfig, ReconnectConfig};
pub use error::ClientError;
pub use stores::{AuctionLiveView, Notification, NotificationLog};
pub use ws::{ConnectionState, WsConnection, WsHandle};
