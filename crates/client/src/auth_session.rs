//! Authentication session handed in by the host application.
//!
//! The live client never logs anyone in itself. The host owns a
//! [`SessionContext`], and [`follow_session`] keeps a connection in step
//! with it: connected while a session is present, closed once it is gone.

use std::fmt;
use std::sync::Arc;

use mzad_shared::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ws::WsHandle;

/// Credentials of the logged-in user.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: UserId,
    pub username: String,
    /// Bearer token sent in the connection URL and the auth frame.
    pub token: String,
}

impl AuthSession {
    pub fn new(user_id: impl Into<UserId>, username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Current session, shared between the host and the live client.
#[derive(Clone, Debug)]
pub struct SessionContext {
    session: Arc<watch::Sender<Option<AuthSession>>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self {
            session: Arc::new(session),
        }
    }

    pub fn login(&self, session: AuthSession) {
        info!(user_id = %session.user_id, "logged in");
        self.session.send_replace(Some(session));
    }

    pub fn logout(&self) {
        if self.session.send_replace(None).is_some() {
            info!("logged out");
        }
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.session.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AuthSession>> {
        self.session.subscribe()
    }
}

/// Drive `handle` from session changes until the client or the context
/// goes away. The session present at start is applied immediately.
pub fn follow_session(
    handle: WsHandle,
    mut sessions: watch::Receiver<Option<AuthSession>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut started = false;
        loop {
            let session = sessions.borrow_and_update().clone();
            let applied = match session {
                Some(session) => handle.connect(session),
                // Nobody logged in yet; nothing to tear down.
                None if !started => Ok(()),
                None => handle.disconnect(),
            };
            started = true;
            if applied.is_err() {
                debug!("live client stopped, no longer following session");
                return;
            }
            if sessions.changed().await.is_err() {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let session = AuthSession::new("7", "sara", "very-secret");
        let printed = format!("{session:?}");
        assert!(printed.contains("sara"));
        assert!(!printed.contains("very-secret"));
    }

    #[test]
    fn login_and_logout_are_observed() {
        let context = SessionContext::new();
        let mut rx = context.subscribe();
        assert!(!context.is_authenticated());

        context.login(AuthSession::new("7", "sara", "t"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|s| s.username.as_str()),
            Some("sara")
        );

        context.logout();
        assert!(context.current().is_none());
        assert!(rx.has_changed().unwrap());
    }
}
