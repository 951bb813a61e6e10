//! Connection actor over tokio-tungstenite.
//!
//! One task owns the socket, the lifecycle, the dispatcher and its stores.
//! It reacts to four event sources in a single `select!` loop: handle
//! commands, the pending connect, inbound frames and the backoff timer.

use std::collections::BTreeSet;
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::future::{self, BoxFuture};
use futures_util::{SinkExt, StreamExt};
use mzad_shared::{AuctionId, ClientCommand};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Command, WsHandle};
use crate::auth_session::AuthSession;
use crate::config::ClientConfig;
use crate::dispatch::{Dispatcher, LocalUser};
use crate::error::ClientError;
use crate::ws::lifecycle::{FailureOutcome, Generation, Lifecycle, TransportEnd};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = BoxFuture<'static, Result<WsStream, String>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const CLOSE_REASON: &str = "User disconnected";

/// A running live client: the connection task plus a handle to it.
pub struct WsConnection {
    handle: WsHandle,
    task: JoinHandle<()>,
}

impl WsConnection {
    /// Validate `config` and start the connection task. The client starts
    /// `Disconnected`; call [`WsHandle::connect`] to activate it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let (sender, commands) = unbounded();
        let lifecycle = Lifecycle::new(config.reconnect.policy());
        let dispatcher = Dispatcher::new(config.notification_capacity, config.pending_bid_capacity);
        let handle = WsHandle::new(
            sender,
            lifecycle.subscribe(),
            dispatcher.store().subscribe(),
            dispatcher.notifications().subscribe(),
        );

        let actor = ConnectionActor {
            config,
            lifecycle,
            dispatcher,
            commands,
            session: None,
            connecting: None,
            socket: None,
            backoff: None,
            joined: BTreeSet::new(),
        };
        let task = tokio::spawn(actor.run());

        Ok(Self { handle, task })
    }

    pub fn handle(&self) -> WsHandle {
        self.handle.clone()
    }

    /// Log out if needed and stop the connection task.
    pub async fn shutdown(self) {
        if self.handle.shutdown().is_err() {
            debug!("connection task already stopped");
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "connection task panicked");
        }
    }
}

struct ConnectionActor {
    config: ClientConfig,
    lifecycle: Lifecycle,
    dispatcher: Dispatcher,
    commands: UnboundedReceiver<Command>,
    session: Option<AuthSession>,
    connecting: Option<(Generation, ConnectFuture)>,
    socket: Option<(Generation, WsStream)>,
    backoff: Option<Pin<Box<Sleep>>>,
    /// Auctions to re-join on every new session.
    joined: BTreeSet<AuctionId>,
}

async fn poll_connect(
    connecting: &mut Option<(Generation, ConnectFuture)>,
) -> (Generation, Result<WsStream, String>) {
    match connecting {
        Some((generation, attempt)) => {
            let result = attempt.await;
            (*generation, result)
        }
        None => pending().await,
    }
}

async fn next_frame(
    socket: &mut Option<(Generation, WsStream)>,
) -> (Generation, Option<Result<Message, WsError>>) {
    match socket {
        Some((generation, stream)) => {
            let frame = stream.next().await;
            (*generation, frame)
        }
        None => pending().await,
    }
}

async fn wait_backoff(backoff: &mut Option<Pin<Box<Sleep>>>) {
    match backoff {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

impl ConnectionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.next() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                (generation, result) = poll_connect(&mut self.connecting) => {
                    self.on_connect_result(generation, result).await;
                }
                (generation, frame) = next_frame(&mut self.socket) => {
                    self.on_frame(generation, frame).await;
                }
                () = wait_backoff(&mut self.backoff) => self.on_backoff_elapsed(),
            }
        }

        self.deactivate().await;
        debug!("connection task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Activate(session) => self.activate(session).await,
            Command::Deactivate => self.deactivate().await,
            Command::PlaceBid(bid) => {
                if !self.lifecycle.state().is_connected() {
                    warn!(auction_id = %bid.auction_id, "connection lost before bid was sent, dropped");
                    return;
                }
                if self.send(bid.to_command()).await {
                    debug!(auction_id = %bid.auction_id, amount = bid.amount, client_ref = %bid.client_ref, "bid sent");
                    self.dispatcher.record_sent_bid(bid);
                }
            }
            Command::Join(auction_id) => {
                self.joined.insert(auction_id.clone());
                if self.lifecycle.state().is_connected() {
                    self.send(ClientCommand::JoinAuction { auction_id }).await;
                }
            }
            Command::Leave(auction_id) => {
                self.joined.remove(&auction_id);
                if self.lifecycle.state().is_connected() {
                    self.send(ClientCommand::LeaveAuction { auction_id }).await;
                }
            }
            Command::MarkRead(id) => self.dispatcher.notifications_mut().mark_read(id),
            Command::ClearNotifications => self.dispatcher.notifications_mut().clear(),
            Command::DiscardAuction(auction_id) => {
                self.dispatcher.store_mut().discard(&auction_id);
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    async fn activate(&mut self, session: AuthSession) {
        if self.session.as_ref() == Some(&session) && !self.lifecycle.state().is_inactive() {
            debug!(user_id = %session.user_id, "session already active");
            return;
        }

        // A new session supersedes whatever transport is current.
        self.connecting = None;
        self.backoff = None;
        self.close_socket().await;

        info!(user_id = %session.user_id, username = %session.username, "activating live session");
        self.dispatcher.set_local_user(Some(LocalUser::new(
            session.user_id.clone(),
            session.username.clone(),
        )));
        self.session = Some(session);
        let generation = self.lifecycle.activate();
        self.start_connect(generation);
    }

    async fn deactivate(&mut self) {
        self.connecting = None;
        self.backoff = None;
        self.close_socket().await;
        self.session = None;
        self.joined.clear();
        self.dispatcher.reset_session();
        self.dispatcher.set_local_user(None);
        self.lifecycle.deactivate();
    }

    fn start_connect(&mut self, generation: Generation) {
        let Some(session) = &self.session else {
            return;
        };
        let timeout = self.config.connect_timeout();
        debug!(generation, attempt = self.lifecycle.attempts(), "opening transport");

        let attempt: ConnectFuture = match self.config.connection_url(&session.token) {
            Ok(url) => Box::pin(async move {
                match tokio::time::timeout(timeout, connect_async(url)).await {
                    Ok(Ok((stream, _response))) => Ok(stream),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                }
            }),
            Err(e) => Box::pin(future::err::<WsStream, String>(e.to_string())),
        };
        self.connecting = Some((generation, attempt));
    }

    async fn on_connect_result(&mut self, generation: Generation, result: Result<WsStream, String>) {
        self.connecting = None;

        let mut stream = match result {
            Ok(stream) => stream,
            Err(reason) => {
                warn!(generation, %reason, "connect failed");
                self.on_transport_failure(generation, TransportEnd::Abnormal);
                return;
            }
        };

        if !self.lifecycle.transport_opened(generation) {
            debug!(generation, "discarding superseded transport");
            return;
        }
        let Some(session) = &self.session else {
            return;
        };

        let auth = ClientCommand::Auth {
            token: session.token.clone(),
        };
        if let Err(e) = stream.send(Message::text(auth.to_json())).await {
            warn!(generation, error = %e, "failed to send auth frame");
            self.on_transport_failure(generation, TransportEnd::Abnormal);
            return;
        }
        debug!(generation, "auth frame sent");
        self.socket = Some((generation, stream));
    }

    async fn on_frame(&mut self, generation: Generation, frame: Option<Result<Message, WsError>>) {
        let end = match frame {
            Some(Ok(Message::Text(text))) => {
                let became_connected = self.lifecycle.frame_received(generation);
                self.dispatcher.handle_frame(text.as_str());
                if became_connected {
                    self.on_connected().await;
                }
                return;
            }
            Some(Ok(Message::Binary(data))) => {
                if self.lifecycle.frame_received(generation) {
                    self.on_connected().await;
                }
                debug!(len = data.len(), "ignoring binary frame");
                return;
            }
            Some(Ok(Message::Close(close))) => match close {
                Some(close) => {
                    let code = u16::from(close.code);
                    info!(code, reason = %close.reason.as_str(), "server closed the connection");
                    if close.code == CloseCode::Normal {
                        TransportEnd::Normal
                    } else {
                        TransportEnd::Abnormal
                    }
                }
                None => {
                    info!("server closed the connection without a close frame");
                    TransportEnd::Abnormal
                }
            },
            // Pongs are written by tungstenite itself.
            Some(Ok(_)) => return,
            Some(Err(e)) => {
                warn!(generation, error = %e, "transport error");
                TransportEnd::Abnormal
            }
            None => {
                warn!(generation, "transport stream ended");
                TransportEnd::Abnormal
            }
        };

        self.socket = None;
        self.on_transport_failure(generation, end);
    }

    async fn on_connected(&mut self) {
        info!(joined = self.joined.len(), "connected");
        let joined: Vec<AuctionId> = self.joined.iter().cloned().collect();
        for auction_id in joined {
            if !self.send(ClientCommand::JoinAuction { auction_id }).await {
                break;
            }
        }
    }

    fn on_transport_failure(&mut self, generation: Generation, end: TransportEnd) {
        match self.lifecycle.transport_failed(generation, end) {
            FailureOutcome::Retry { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.backoff = Some(Box::pin(tokio::time::sleep(delay)));
            }
            FailureOutcome::GaveUp | FailureOutcome::Stopped => {}
            FailureOutcome::Stale => debug!(generation, "ignoring failure of superseded transport"),
        }
    }

    fn on_backoff_elapsed(&mut self) {
        self.backoff = None;
        if let Some(generation) = self.lifecycle.backoff_elapsed() {
            self.start_connect(generation);
        }
    }

    /// Write one frame. A failed write ends the transport.
    async fn send(&mut self, command: ClientCommand) -> bool {
        let Some((generation, stream)) = self.socket.as_mut() else {
            return false;
        };
        let generation = *generation;

        if let Err(e) = stream.send(Message::text(command.to_json())).await {
            warn!(generation, error = %e, "send failed");
            self.socket = None;
            self.on_transport_failure(generation, TransportEnd::Abnormal);
            return false;
        }
        true
    }

    /// Graceful intentional close (code 1000).
    async fn close_socket(&mut self) {
        let Some((generation, mut stream)) = self.socket.take() else {
            return;
        };
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: CLOSE_REASON.into(),
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, stream.close(Some(frame))).await {
            Ok(Ok(())) => debug!(generation, "transport closed"),
            Ok(Err(e)) => debug!(generation, error = %e, "close handshake failed"),
            Err(_) => debug!(generation, "close handshake timed out"),
        }
    }
}
