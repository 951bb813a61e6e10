//! Notification center: a bounded, newest-first log of user-facing events.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use mzad_shared::{AuctionId, NotificationKind, NotificationPayload, RemoteNoticeId};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub auction_id: Option<AuctionId>,
    /// Id the server attached, for server-pushed notifications.
    pub remote_id: Option<RemoteNoticeId>,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            message: message.into(),
            auction_id: None,
            remote_id: None,
            timestamp: Utc::now(),
            read: false,
        }
    }

    pub fn for_auction(mut self, auction_id: AuctionId) -> Self {
        self.auction_id = Some(auction_id);
        self
    }
}

impl From<NotificationPayload> for Notification {
    fn from(payload: NotificationPayload) -> Self {
        let kind = payload
            .kind
            .as_deref()
            .map(NotificationKind::from_wire)
            .unwrap_or(NotificationKind::Generic);
        Self {
            id: Uuid::new_v4(),
            kind,
            title: payload.title,
            message: payload.message,
            auction_id: payload.auction_id,
            remote_id: payload.id,
            timestamp: payload.timestamp.unwrap_or_else(Utc::now),
            read: false,
        }
    }
}

/// Read-only snapshot of the log, newest entry first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationLog {
    entries: VecDeque<Notification>,
}

impl NotificationLog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.read).count()
    }

    pub fn latest(&self) -> Option<&Notification> {
        self.entries.front()
    }

    pub fn get(&self, id: Uuid) -> Option<&Notification> {
        self.entries.iter().find(|n| n.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }
}

#[derive(Debug)]
pub struct NotificationCenter {
    log: watch::Sender<NotificationLog>,
    capacity: usize,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationCenter {
    pub fn new(capacity: usize) -> Self {
        let (log, _) = watch::channel(NotificationLog::default());
        Self {
            log,
            capacity: capacity.max(1),
        }
    }

    /// Prepend a notification, evicting the oldest beyond capacity.
    pub fn add(&mut self, notification: Notification) {
        tracing::debug!(
            kind = %notification.kind,
            auction_id = ?notification.auction_id.as_ref().map(|id| id.as_str()),
            "notification added"
        );
        let capacity = self.capacity;
        self.log.send_modify(|log| {
            log.entries.push_front(notification);
            log.entries.truncate(capacity);
        });
    }

    /// Mark one notification as read. Unknown ids are ignored.
    pub fn mark_read(&mut self, id: Uuid) {
        self.log.send_if_modified(|log| {
            match log.entries.iter_mut().find(|n| n.id == id) {
                Some(entry) if !entry.read => {
                    entry.read = true;
                    true
                }
                _ => false,
            }
        });
    }

    pub fn clear(&mut self) {
        self.log.send_if_modified(|log| {
            let had_entries = !log.entries.is_empty();
            log.entries.clear();
            had_entries
        });
    }

    pub fn snapshot(&self) -> NotificationLog {
        self.log.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.log.borrow().unread_count()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationLog> {
        self.log.subscribe()
    }
}
