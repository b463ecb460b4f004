//! WebSocket transport tests
//!
//! Runs the client against an in-process tokio-tungstenite server:
//! - correlated login round trip
//! - subscription replay after the server drops the connection
//! - flush against reachable and unreachable endpoints
//! - binary and non-frame text do not stop delivery

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rtds_client::transport::ws::WsConnector;
use rtds_client::{Client, EndpointOptions, Subscription};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

type ServerStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerStream {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn next_frame(ws: &mut ServerStream) -> Option<Value> {
    while let Some(msg) = ws.next().await {
        if let Ok(Message::Text(text)) = msg {
            return Some(serde_json::from_str(&text).unwrap());
        }
    }
    None
}

fn fast_client() -> Client {
    let connector = WsConnector::new().with_backoff(Duration::from_millis(10), Duration::from_millis(50));
    Client::builder(Arc::new(connector)).build()
}

#[tokio::test]
async fn test_login_round_trip_over_websocket() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let frame = next_frame(&mut ws).await.unwrap();
        let reply = json!({
            "type": "login-successful",
            "data": {"user": {"id": 1}, "token": "T"},
        });
        ws.send(Message::Text(reply.to_string())).await.unwrap();
        // Keep the socket open until the client has read the reply.
        let _ = next_frame(&mut ws).await;
        frame
    });

    let client = fast_client();
    client.configure(&EndpointOptions::url(url)).unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), client.login("ada", "pw"))
        .await
        .expect("login reply")
        .unwrap();
    assert_eq!(reply["token"], "T");
    assert!(client.is_logged_in());

    drop(client);
    let login = server.await.unwrap();
    assert_eq!(
        login,
        json!({"type": "login", "data": {"user": "ada", "password": "pw"}})
    );
}

#[tokio::test]
async fn test_subscriptions_replayed_after_server_drop() {
    let (listener, url) = bind().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        // First connection: read the subscribe, then drop the socket.
        let mut first = accept(&listener).await;
        if let Some(frame) = next_frame(&mut first).await {
            seen_tx.send(("first", frame)).unwrap();
        }
        drop(first);

        let mut second = accept(&listener).await;
        if let Some(frame) = next_frame(&mut second).await {
            seen_tx.send(("second", frame)).unwrap();
        }
        let _ = next_frame(&mut second).await;
    });

    let client = fast_client();
    client.configure(&EndpointOptions::url(url)).unwrap();
    client.subscribe(&Subscription::channel("todos")).unwrap();

    let expected = json!({"type": "subscribe", "data": {"channel": "todos"}});
    for connection in ["first", "second"] {
        let (seen, frame) = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .expect("frame before timeout")
            .unwrap();
        assert_eq!(seen, connection);
        assert_eq!(frame, expected);
    }
}

#[tokio::test]
async fn test_flush_waits_for_frame_to_be_written() {
    let (listener, url) = bind().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        while let Some(frame) = next_frame(&mut ws).await {
            seen_tx.send(frame).unwrap();
        }
    });

    let client = fast_client();
    client.configure(&EndpointOptions::url(url)).unwrap();
    client.create_objects(json!({"todos": [{"title": "x"}]})).unwrap();
    client.flush(Duration::from_secs(5)).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("frame before timeout")
        .unwrap();
    assert_eq!(frame["type"], "create-objects");
}

#[tokio::test]
async fn test_flush_fails_when_endpoint_unreachable() {
    let (listener, url) = bind().await;
    drop(listener);

    let client = fast_client();
    client.configure(&EndpointOptions::url(url)).unwrap();
    client.send("ping", json!({})).unwrap();

    let result = client.flush(Duration::from_millis(200)).await;
    assert!(matches!(result, Err(rtds_client::ClientError::Transport(_))));
}

#[tokio::test]
async fn test_binary_and_garbled_text_do_not_stop_delivery() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        ws.send(Message::Text(format!("{}é tail", "a".repeat(99))))
            .await
            .unwrap();
        let frame = json!({"type": "todos", "data": {"id": 1}});
        ws.send(Message::Text(frame.to_string())).await.unwrap();
        let _ = next_frame(&mut ws).await;
    });

    let client = fast_client();
    client.configure(&EndpointOptions::url(url)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .listen(
            "todos",
            &rtds_client::listener(move |payload| {
                let _ = tx.send(payload.clone());
            }),
        )
        .unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message before timeout")
        .unwrap();
    assert_eq!(payload, json!({"id": 1}));
}
