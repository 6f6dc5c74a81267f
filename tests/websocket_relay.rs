//! WebSocket relay through a running gateway.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gateway_proxy::config::GatewayConfig;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

mod common;

fn ws_mount(gateway: std::net::SocketAddr) -> String {
    common::mount(gateway, "live").replacen("http://", "ws://", 1)
}

async fn start() -> (String, tokio::sync::mpsc::UnboundedReceiver<u16>, gateway_proxy::Shutdown) {
    let (backend, closes) = common::start_ws_backend().await;
    let (gateway, shutdown) = common::start_gateway(GatewayConfig {
        services: vec![common::service("live", backend)],
        ..Default::default()
    })
    .await;
    (ws_mount(gateway), closes, shutdown)
}

async fn next_message<S>(socket: &mut S) -> Message
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket ended")
        .expect("socket error")
}

#[tokio::test]
async fn frames_sent_during_handshake_arrive_in_order() {
    let (base, _closes, _shutdown) = start().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{base}/ws/echo.websocket"))
        .await
        .unwrap();

    // Sent straight away, most likely while the backend session is still opening.
    socket.send(Message::text("one")).await.unwrap();
    socket.send(Message::binary(vec![0u8, 1, 2])).await.unwrap();
    socket.send(Message::text("three")).await.unwrap();

    assert_eq!(next_message(&mut socket).await, Message::text("one"));
    assert_eq!(next_message(&mut socket).await, Message::binary(vec![0u8, 1, 2]));
    assert_eq!(next_message(&mut socket).await, Message::text("three"));
}

#[tokio::test]
async fn query_survives_marker_stripping() {
    let (base, _closes, _shutdown) = start().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{base}/ws/echo.websocket?token=abc"))
        .await
        .unwrap();

    socket.send(Message::text("ping")).await.unwrap();
    assert_eq!(next_message(&mut socket).await, Message::text("ping"));
}

#[tokio::test]
async fn client_close_below_minimum_reaches_backend_as_proxy_code() {
    let (base, mut closes, _shutdown) = start().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{base}/ws/echo"))
        .await
        .unwrap();

    socket.send(Message::text("hello")).await.unwrap();
    assert_eq!(next_message(&mut socket).await, Message::text("hello"));

    socket
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }))
        .await
        .unwrap();

    let code = tokio::time::timeout(Duration::from_secs(5), closes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, 4998);
}

#[tokio::test]
async fn backend_close_below_minimum_reaches_client_as_proxy_code() {
    let (base, _closes, _shutdown) = start().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{base}/ws/close/1000"))
        .await
        .unwrap();

    socket.send(Message::text("trigger")).await.unwrap();
    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4998);
            assert_eq!(frame.reason.as_str(), "bye");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn application_close_code_passes_through() {
    let (base, _closes, _shutdown) = start().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{base}/ws/close/4001"))
        .await
        .unwrap();

    socket.send(Message::text("trigger")).await.unwrap();
    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4001),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_backend_drops_client_session() {
    let port = common::closed_port().await;
    let (gateway, _shutdown) = common::start_gateway(GatewayConfig {
        services: vec![common::service("live", ([127, 0, 0, 1], port).into())],
        ..Default::default()
    })
    .await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{}/ws/echo", ws_mount(gateway)))
        .await
        .unwrap();

    // Either the stream ends or it errors; no data frame ever arrives.
    let next = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("session was not dropped");
    assert!(!matches!(next, Some(Ok(Message::Text(_) | Message::Binary(_)))));
}

#[tokio::test]
async fn backend_dropping_mid_session_drops_client_without_close() {
    let (base, _closes, _shutdown) = start().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{base}/ws/drop"))
        .await
        .unwrap();

    socket.send(Message::text("trigger")).await.unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("client session outlived the backend");
    assert!(
        matches!(next, None | Some(Err(_))),
        "expected a dropped connection, got {next:?}"
    );
}

/// Next frame that is not a pong.
async fn next_skipping_pongs<S>(socket: &mut S) -> Message
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match next_message(socket).await {
            Message::Pong(_) => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn pings_and_pongs_cross_the_relay() {
    let (base, _closes, _shutdown) = start().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{base}/ws/ping"))
        .await
        .unwrap();

    // Client to backend.
    socket.send(Message::Ping("from-client".into())).await.unwrap();
    assert_eq!(next_skipping_pongs(&mut socket).await, Message::text("ping:from-client"));

    // Backend to client, and the client's automatic pong back to the backend.
    socket.send(Message::text("send-ping")).await.unwrap();
    match next_skipping_pongs(&mut socket).await {
        Message::Ping(payload) => assert_eq!(&payload[..], b"from-backend"),
        other => panic!("expected ping, got {other:?}"),
    }
    assert_eq!(next_skipping_pongs(&mut socket).await, Message::text("pong:from-backend"));
}
