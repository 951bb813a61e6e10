//! Live auction wire protocol.
//!
//! Every frame in either direction is a JSON envelope `{"type": ..., "payload": {...}}`.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::*;

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientCommand {
    Auth {
        token: String,
    },
    PlaceBid {
        auction_id: AuctionId,
        amount: f64,
        /// Client-generated reference, echoed back on `bid_confirmation`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<uuid::Uuid>,
    },
    JoinAuction {
        auction_id: AuctionId,
    },
    LeaveAuction {
        auction_id: AuctionId,
    },
}

impl ClientCommand {
    pub fn to_json(&self) -> String {
        // Plain strings and numbers only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    AuctionUpdate(AuctionUpdatePayload),
    NewBid(NewBidPayload),
    AuctionEnded(AuctionEndedPayload),
    Notification(NotificationPayload),
    BidConfirmation(BidConfirmationPayload),
    BidError(BidErrorPayload),
    OutbidNotification(OutbidNoticePayload),
    AuctionExtended(AuctionExtendedPayload),
}

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ServerEvent),
    /// Well-formed envelope with a kind this client does not handle.
    Unrecognized(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    value: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::MalformedPayload { kind, source })
}

/// Hoist a nested `update_data` object into the top-level payload.
/// Top-level keys win over nested ones.
fn flatten_update_data(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = value.as_object_mut() {
        if let Some(serde_json::Value::Object(nested)) = obj.remove("update_data") {
            for (key, field) in nested {
                obj.entry(key).or_insert(field);
            }
        }
    }
    value
}

impl ServerEvent {
    pub const AUCTION_UPDATE: &'static str = "auction_update";
    pub const NEW_BID: &'static str = "new_bid";
    pub const AUCTION_ENDED: &'static str = "auction_ended";
    pub const NOTIFICATION: &'static str = "notification";
    pub const BID_CONFIRMATION: &'static str = "bid_confirmation";
    pub const BID_ERROR: &'static str = "bid_error";
    pub const OUTBID_NOTIFICATION: &'static str = "outbid_notification";
    pub const AUCTION_EXTENDED: &'static str = "auction_extended";

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(ProtocolError::InvalidFrame)?;

        let event = match raw.kind.as_str() {
            Self::AUCTION_UPDATE => ServerEvent::AuctionUpdate(payload(
                Self::AUCTION_UPDATE,
                flatten_update_data(raw.payload),
            )?),
            Self::NEW_BID => ServerEvent::NewBid(payload(Self::NEW_BID, raw.payload)?),
            Self::AUCTION_ENDED => {
                ServerEvent::AuctionEnded(payload(Self::AUCTION_ENDED, raw.payload)?)
            }
            Self::NOTIFICATION => {
                ServerEvent::Notification(payload(Self::NOTIFICATION, raw.payload)?)
            }
            Self::BID_CONFIRMATION => {
                ServerEvent::BidConfirmation(payload(Self::BID_CONFIRMATION, raw.payload)?)
            }
            Self::BID_ERROR => ServerEvent::BidError(payload(Self::BID_ERROR, raw.payload)?),
            Self::OUTBID_NOTIFICATION => {
                ServerEvent::OutbidNotification(payload(Self::OUTBID_NOTIFICATION, raw.payload)?)
            }
            Self::AUCTION_EXTENDED => {
                ServerEvent::AuctionExtended(payload(Self::AUCTION_EXTENDED, raw.payload)?)
            }
            _ => return Ok(Inbound::Unrecognized(raw.kind)),
        };

        Ok(Inbound::Event(event))
    }

    /// Wire name of this event's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::AuctionUpdate(_) => Self::AUCTION_UPDATE,
            ServerEvent::NewBid(_) => Self::NEW_BID,
            ServerEvent::AuctionEnded(_) => Self::AUCTION_ENDED,
            ServerEvent::Notification(_) => Self::NOTIFICATION,
            ServerEvent::BidConfirmation(_) => Self::BID_CONFIRMATION,
            ServerEvent::BidError(_) => Self::BID_ERROR,
            ServerEvent::OutbidNotification(_) => Self::OUTBID_NOTIFICATION,
            ServerEvent::AuctionExtended(_) => Self::AUCTION_EXTENDED,
        }
    }

    /// Auction this event refers to, if any.
    pub fn auction_id(&self) -> Option<&AuctionId> {
        match self {
            ServerEvent::AuctionUpdate(p) => Some(&p.id),
            ServerEvent::NewBid(p) => Some(&p.auction_id),
            ServerEvent::AuctionEnded(p) => Some(&p.auction_id),
            ServerEvent::Notification(p) => p.auction_id.as_ref(),
            ServerEvent::BidConfirmation(p) => Some(&p.auction_id),
            ServerEvent::BidError(p) => p.auction_id.as_ref(),
            ServerEvent::OutbidNotification(p) => Some(&p.auction_id),
            ServerEvent::AuctionExtended(p) => Some(&p.auction_id),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
