//! Mzad Live - command line follower
//!
//! Connects with credentials from the environment, follows the auctions
//! given as arguments and logs everything that happens until Ctrl-C.

use anyhow::Context;
use mzad_live::{
    follow_session, logging, AuthSession, ClientConfig, ConnectionState, SessionContext,
    WsConnection,
};
use mzad_shared::AuctionId;
use tracing::{info, warn};

fn credentials() -> anyhow::Result<AuthSession> {
    let user_id = std::env::var("MZAD_USER_ID").context("MZAD_USER_ID is not set")?;
    let token = std::env::var("MZAD_TOKEN").context("MZAD_TOKEN is not set")?;
    let username = std::env::var("MZAD_USERNAME").unwrap_or_else(|_| user_id.clone());
    Ok(AuthSession::new(user_id, username, token))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = ClientConfig::from_env();
    let session = credentials()?;
    let follow: Vec<AuctionId> = std::env::args().skip(1).map(AuctionId::from).collect();

    let connection = WsConnection::spawn(config).context("invalid client configuration")?;
    let client = connection.handle();

    let sessions = SessionContext::new();
    let follower = follow_session(client.clone(), sessions.subscribe());
    sessions.login(session);

    let mut states = client.watch_state();
    let mut auctions = client.watch_auctions();
    let mut notifications = client.watch_notifications();
    let mut joined = false;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted, logging out");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!(%state, "connection state changed");
                match state {
                    // Joins are replayed by the client after reconnects.
                    ConnectionState::Connected if !joined => {
                        for auction_id in &follow {
                            if let Err(e) = client.join_auction(auction_id.clone()) {
                                warn!(auction_id = %auction_id, error = %e, "join failed");
                            }
                        }
                        joined = true;
                    }
                    ConnectionState::Disconnected => {
                        warn!("offline; restart to try again");
                    }
                    _ => {}
                }
            }
            changed = auctions.changed() => {
                if changed.is_err() {
                    break;
                }
                let views = auctions.borrow_and_update().clone();
                for view in views.values() {
                    info!(
                        auction_id = %view.auction_id,
                        title = %view.display_name(),
                        price = view.current_price,
                        total_bids = view.total_bids,
                        status = ?view.status,
                        "auction"
                    );
                }
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    break;
                }
                let log = notifications.borrow_and_update().clone();
                if let Some(latest) = log.latest() {
                    info!(
                        kind = %latest.kind,
                        unread = log.unread_count(),
                        "{}: {}",
                        latest.title,
                        latest.message
                    );
                }
            }
        }
    }

    sessions.logout();
    if let Err(e) = client.wait_for_state(ConnectionState::Closed).await {
        warn!(error = %e, "client stopped before closing");
    }
    follower.abort();
    connection.shutdown().await;
    Ok(())
}
