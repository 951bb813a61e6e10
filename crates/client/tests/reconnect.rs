mod common;

use std::time::Duration;

use common::*;
use mzad_live::{ConnectionState, WsConnection};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

#[tokio::test]
async fn gives_up_after_reconnect_budget() {
    let (listener, endpoint) = bind().await;

    // Accept TCP and hang up before the WebSocket handshake.
    let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
            if accepted_tx.send(()).is_err() {
                break;
            }
        }
    });

    let connection = WsConnection::spawn(config(&endpoint, 10)).unwrap();
    let client = connection.handle();
    client.connect(session()).unwrap();

    // The first attempt plus five reconnects.
    for attempt in 1..=6 {
        timeout(TIMEOUT, accepted.recv())
            .await
            .unwrap_or_else(|_| panic!("attempt {attempt} never happened"))
            .unwrap();
    }
    wait_state(&client, ConnectionState::Disconnected).await;

    // Longer than the whole backoff schedule: no further attempt.
    sleep(Duration::from_millis(500)).await;
    assert!(accepted.try_recv().is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Explicit re-activation starts over.
    client.connect(session()).unwrap();
    timeout(TIMEOUT, accepted.recv()).await.unwrap().unwrap();

    connection.shutdown().await;
}

#[tokio::test]
async fn dropped_connection_reconnects_and_rejoins() {
    let (listener, endpoint) = bind().await;
    let connection = WsConnection::spawn(config(&endpoint, 100)).unwrap();
    let client = connection.handle();
    client.connect(session()).unwrap();

    let mut first = accept_authenticated(&listener).await;
    send(&mut first, "auction_update", json!({"auction_id": "A1", "current_price": 10})).await;
    wait_state(&client, ConnectionState::Connected).await;
    client.join_auction("A1").unwrap();
    assert_eq!(recv(&mut first).await["type"], "join_auction");

    // Hang up without a close frame.
    drop(first);
    wait_state(&client, ConnectionState::Reconnecting).await;

    let mut second = accept_authenticated(&listener).await;
    send(&mut second, "auction_update", json!({"auction_id": "A1", "current_price": 12})).await;
    wait_state(&client, ConnectionState::Connected).await;
    assert_eq!(
        recv(&mut second).await,
        json!({"type": "join_auction", "payload": {"auction_id": "A1"}})
    );

    connection.shutdown().await;
}

#[tokio::test]
async fn left_auctions_are_not_rejoined() {
    let (listener, endpoint) = bind().await;
    let connection = WsConnection::spawn(config(&endpoint, 100)).unwrap();
    let client = connection.handle();
    client.connect(session()).unwrap();

    let mut first = accept_authenticated(&listener).await;
    send(&mut first, "auction_update", json!({"auction_id": "A1"})).await;
    wait_state(&client, ConnectionState::Connected).await;

    client.join_auction("A1").unwrap();
    client.join_auction("A2").unwrap();
    client.leave_auction("A2").unwrap();
    assert_eq!(recv(&mut first).await["payload"]["auction_id"], "A1");
    assert_eq!(recv(&mut first).await["payload"]["auction_id"], "A2");
    assert_eq!(
        recv(&mut first).await,
        json!({"type": "leave_auction", "payload": {"auction_id": "A2"}})
    );

    drop(first);
    wait_state(&client, ConnectionState::Reconnecting).await;

    let mut second = accept_authenticated(&listener).await;
    send(&mut second, "auction_update", json!({"auction_id": "A1"})).await;
    wait_state(&client, ConnectionState::Connected).await;
    assert_eq!(
        recv(&mut second).await,
        json!({"type": "join_auction", "payload": {"auction_id": "A1"}})
    );

    // Next frame is this leave, so A2 was not replayed before it.
    client.leave_auction("A1").unwrap();
    assert_eq!(
        recv(&mut second).await,
        json!({"type": "leave_auction", "payload": {"auction_id": "A1"}})
    );

    connection.shutdown().await;
}

#[tokio::test]
async fn logout_during_backoff_cancels_reconnect() {
    let (listener, endpoint) = bind().await;
    let connection = WsConnection::spawn(config(&endpoint, 300)).unwrap();
    let client = connection.handle();
    client.connect(session()).unwrap();

    let mut server = accept_authenticated(&listener).await;
    send(&mut server, "notification", json!({"title": "hi", "message": ""})).await;
    wait_state(&client, ConnectionState::Connected).await;

    drop(server);
    wait_state(&client, ConnectionState::Reconnecting).await;

    client.disconnect().unwrap();
    wait_state(&client, ConnectionState::Closed).await;
    assert!(no_connection(&listener, Duration::from_millis(800)).await);
    assert_eq!(client.state(), ConnectionState::Closed);

    connection.shutdown().await;
}

#[tokio::test]
async fn normal_server_close_is_not_retried() {
    let (listener, endpoint) = bind().await;
    let connection = WsConnection::spawn(config(&endpoint, 20)).unwrap();
    let client = connection.handle();
    client.connect(session()).unwrap();

    let mut server = accept_authenticated(&listener).await;
    send(&mut server, "auction_update", json!({"auction_id": "A1"})).await;
    wait_state(&client, ConnectionState::Connected).await;

    server
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "server shutting down".into(),
        }))
        .await
        .unwrap();

    wait_state(&client, ConnectionState::Disconnected).await;
    assert!(no_connection(&listener, Duration::from_millis(300)).await);

    connection.shutdown().await;
}

#[tokio::test]
async fn rejected_auth_close_takes_reconnect_path() {
    let (listener, endpoint) = bind().await;
    let connection = WsConnection::spawn(config(&endpoint, 20)).unwrap();
    let client = connection.handle();
    client.connect(session()).unwrap();

    let mut server = accept_authenticated(&listener).await;
    server
        .close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "invalid token".into(),
        }))
        .await
        .unwrap();

    // Abnormal close while authenticating: back off and try again.
    let mut retry = accept_authenticated(&listener).await;
    send(&mut retry, "auction_update", json!({"auction_id": "A1"})).await;
    wait_state(&client, ConnectionState::Connected).await;

    connection.shutdown().await;
}
