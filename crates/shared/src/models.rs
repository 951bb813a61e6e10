use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Identifiers ---

/// Defines a string-backed identifier that also accepts JSON integers.
///
/// The auction backend hands out integer primary keys, while other producers
/// send strings; both decode to the same identifier.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                deserializer.deserialize_any(IdVisitor).map(Self)
            }
        }
    };
}

struct IdVisitor;

impl<'de> serde::de::Visitor<'de> for IdVisitor {
    type Value = String;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a string or integer identifier")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_string<E: serde::de::Error>(self, v: String) -> Result<String, E> {
        Ok(v)
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }
}

string_id!(
    /// Identifier of an auction.
    AuctionId
);
string_id!(
    /// Identifier of a user (bidder, winner, local account).
    UserId
);
string_id!(
    /// Server-assigned identifier of a single bid.
    BidId
);
string_id!(
    /// Identifier a server attached to a pushed notification.
    RemoteNoticeId
);

// --- Timestamps ---

/// Lenient timestamp decoding.
///
/// Accepts RFC 3339, naive ISO-8601 (read as UTC) and epoch milliseconds.
/// Anything else decodes to `None` instead of failing the whole frame.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::{Deserializer, Error, Visitor};
    use serde::Deserialize;

    pub fn parse(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc())
    }

    struct Lenient(Option<DateTime<Utc>>);

    struct LenientVisitor;

    impl<'de> Visitor<'de> for LenientVisitor {
        type Value = Lenient;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a timestamp string or epoch milliseconds")
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Lenient, E> {
            Ok(Lenient(parse(v)))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Lenient, E> {
            Ok(Lenient(DateTime::from_timestamp_millis(v)))
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Lenient, E> {
            Ok(Lenient(
                i64::try_from(v).ok().and_then(DateTime::from_timestamp_millis),
            ))
        }

        fn visit_f64<E: Error>(self, v: f64) -> Result<Lenient, E> {
            Ok(Lenient(DateTime::from_timestamp_millis(v as i64)))
        }

        fn visit_unit<E: Error>(self) -> Result<Lenient, E> {
            Ok(Lenient(None))
        }
    }

    impl<'de> Deserialize<'de> for Lenient {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(LenientVisitor)
        }
    }

    /// `deserialize_with` target for `Option<DateTime<Utc>>` fields.
    pub fn option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Lenient>::deserialize(deserializer)?.and_then(|l| l.0))
    }
}

// --- Auctions ---

/// Lifecycle status of an auction as seen by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    #[default]
    Active,
    Ended,
}

impl AuctionStatus {
    /// Map a server status string. Statuses the client does not track
    /// (drafts, scheduled auctions) map to `None`.
    pub fn from_wire(status: &str) -> Option<Self> {
        match status.to_ascii_lowercase().as_str() {
            "active" | "live" => Some(AuctionStatus::Active),
            "ended" | "closed" | "completed" => Some(AuctionStatus::Ended),
            _ => None,
        }
    }
}

/// `auction_update` payload. Field names follow the backend's snake_case
/// auction representation; unknown fields are kept in `attributes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuctionUpdatePayload {
    #[serde(alias = "auction_id")]
    pub id: AuctionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bids: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bidder_id: Option<UserId>,
    #[serde(default, alias = "last_bidder", skip_serializing_if = "Option::is_none")]
    pub last_bidder_name: Option<String>,
    #[serde(
        default,
        alias = "last_bid_at",
        deserialize_with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_bid_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_price: Option<f64>,
    #[serde(
        default,
        deserialize_with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl AuctionUpdatePayload {
    pub fn new(id: impl Into<AuctionId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            current_price: None,
            total_bids: None,
            last_bidder_id: None,
            last_bidder_name: None,
            last_bid_time: None,
            status: None,
            winner_id: None,
            final_price: None,
            end_time: None,
            attributes: serde_json::Map::new(),
        }
    }
}

/// `new_bid` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewBidPayload {
    pub auction_id: AuctionId,
    pub amount: f64,
    /// Some servers only name the bidder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bidder_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bidder_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_id: Option<BidId>,
    #[serde(
        default,
        deserialize_with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    /// Server-side count after this bid, when the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bids: Option<u64>,
}

/// `auction_ended` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuctionEndedPayload {
    pub auction_id: AuctionId,
    #[serde(default)]
    pub winner_id: Option<UserId>,
    #[serde(default)]
    pub final_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bids: Option<u64>,
    #[serde(
        default,
        deserialize_with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `bid_confirmation` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidConfirmationPayload {
    pub auction_id: AuctionId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_id: Option<BidId>,
    /// Echo of the `client_ref` sent with `place_bid`, if the server supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<uuid::Uuid>,
}

/// `bid_error` payload: a rejected `place_bid` reported outside `bid_confirmation`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_id: Option<AuctionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `notification` payload, passed straight into the notification log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RemoteNoticeId>,
    #[serde(default, rename = "type", alias = "kind", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_id: Option<AuctionId>,
    #[serde(
        default,
        deserialize_with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `outbid_notification` payload: the server telling this user directly
/// that they were outbid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutbidNoticePayload {
    pub auction_id: AuctionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_title: Option<String>,
}

/// `auction_extended` payload (anti-sniping extension of the end time).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuctionExtendedPayload {
    pub auction_id: AuctionId,
    #[serde(default, deserialize_with = "timestamp::option")]
    pub new_end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_time: Option<u64>,
}

// --- Notifications ---

/// Kind of a user-facing notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BidAccepted,
    BidRejected,
    Outbid,
    AuctionWon,
    Generic,
}

impl NotificationKind {
    /// Map a wire kind; unknown kinds become `Generic`.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "bid_accepted" | "bid_success" => NotificationKind::BidAccepted,
            "bid_rejected" | "bid_error" => NotificationKind::BidRejected,
            "outbid" => NotificationKind::Outbid,
            "auction_won" => NotificationKind::AuctionWon,
            _ => NotificationKind::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BidAccepted => "bid_accepted",
            NotificationKind::BidRejected => "bid_rejected",
            NotificationKind::Outbid => "outbid",
            NotificationKind::AuctionWon => "auction_won",
            NotificationKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
