//! In-process auction server for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mzad_live::{AuthSession, ClientConfig, ConnectionState, ReconnectConfig, WsHandle};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub type ServerSocket = WebSocketStream<TcpStream>;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    (listener, endpoint)
}

pub fn config(endpoint: &str, base_delay_ms: u64) -> ClientConfig {
    ClientConfig::new(endpoint)
        .with_connect_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectConfig {
            max_attempts: 5,
            base_delay_ms,
            max_delay_ms: 30_000,
        })
}

pub fn session() -> AuthSession {
    AuthSession::new("U1", "sara", "token-u1")
}

/// Accept one WebSocket client. Returns the socket and the request URI.
pub async fn accept(listener: &TcpListener) -> (ServerSocket, String) {
    let (stream, _) = timeout(TIMEOUT, listener.accept())
        .await
        .expect("client never connected")
        .unwrap();

    let mut uri = String::new();
    let socket = accept_hdr_async(stream, |request: &Request, response: Response| {
        uri = request.uri().to_string();
        Ok(response)
    })
    .await
    .unwrap();
    (socket, uri)
}

/// Accept a client and consume its auth frame.
pub async fn accept_authenticated(listener: &TcpListener) -> ServerSocket {
    let (mut socket, _) = accept(listener).await;
    let auth = recv(&mut socket).await;
    assert_eq!(auth["type"], "auth");
    socket
}

/// Next text frame from the client, as JSON.
pub async fn recv(socket: &mut ServerSocket) -> Value {
    loop {
        let message = timeout(TIMEOUT, socket.next())
            .await
            .expect("no frame from client")
            .expect("client stream ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

/// Wait for the client's close frame.
pub async fn recv_close(socket: &mut ServerSocket) -> Option<CloseFrame> {
    loop {
        let message = timeout(TIMEOUT, socket.next())
            .await
            .expect("client never closed")
            .expect("client stream ended without close frame")
            .unwrap();
        match message {
            Message::Close(frame) => return frame,
            Message::Text(text) => panic!("unexpected frame before close: {}", text.as_str()),
            _ => continue,
        }
    }
}

pub async fn send(socket: &mut ServerSocket, kind: &str, payload: Value) {
    let frame = json!({"type": kind, "payload": payload}).to_string();
    socket.send(Message::text(frame)).await.unwrap();
}

pub async fn send_raw(socket: &mut ServerSocket, text: &str) {
    socket.send(Message::text(text.to_string())).await.unwrap();
}

pub async fn wait_state(handle: &WsHandle, state: ConnectionState) {
    timeout(TIMEOUT, handle.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state}, stuck in {}", handle.state()))
        .unwrap();
}

/// True if nobody connects within `within`.
pub async fn no_connection(listener: &TcpListener, within: Duration) -> bool {
    timeout(within, listener.accept()).await.is_err()
}
