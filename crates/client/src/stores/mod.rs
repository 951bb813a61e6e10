//! Client-side state owned by the connection task.

pub mod auctions;
pub mod notifications;

pub use auctions::{AuctionLiveView, AuctionMap, AuctionPatch, AuctionStore, MergeOutcome};
pub use notifications::{Notification, NotificationCenter, NotificationLog};
