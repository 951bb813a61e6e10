//! WebSocket module for the live auction connection.
//!
//! This module provides:
//! - The connection lifecycle state machine with bounded auto-reconnect
//! - A connection task that owns the socket and every piece of live state
//! - A cloneable handle for reading snapshots and queueing commands
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────┐  commands   ┌──────────────────────────────┐
//!   │ WsHandle │ ──────────▶ │        WsConnection task     │
//!   │ (clones) │             │  Lifecycle ─ Dispatcher      │
//!   └──────────┘             │      │          │            │
//!        ▲                   │   socket   AuctionStore      │
//!        │   watch snapshots │            NotificationCenter│
//!        └────────────────── └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let connection = WsConnection::spawn(ClientConfig::from_env())?;
//! let client = connection.handle();
//! client.connect(session)?;
//! client.wait_for_state(ConnectionState::Connected).await?;
//! client.place_bid("A1", 120.0)?;
//! ```

mod connection;
pub mod lifecycle;
mod reconnect;

pub use connection::{ConnectionState, WsConnection, WsHandle};
pub use lifecycle::{FailureOutcome, Generation, Lifecycle, TransportEnd};
pub use reconnect::{Backoff, ReconnectPolicy};
