//! End-to-end handshake/heartbeat/close scenarios against a mock gateway
//! speaking raw WebSocket frames, grounded in the same hand-rolled mock
//! server shape used elsewhere in this corpus for client integration tests.

use futures_util::{SinkExt, StreamExt};
use gateway_core::{connection::EventConsumer, Config, Intents, Stage, Supervisor, TerminationError};
use serde_json::{json, Value};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};

async fn accept_one(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _peer) = listener.accept().await.expect("accept failed");
    tokio_tungstenite::accept_async(stream).await.expect("websocket upgrade failed")
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(value.to_string())).await.expect("send failed");
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await.expect("stream ended early").expect("websocket error") {
            Message::Text(text) => return serde_json::from_str(&text).expect("not valid json"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message from client: {other:?}"),
        }
    }
}

fn recording_consumer() -> (EventConsumer, Arc<Mutex<Vec<(String, Value)>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&events);
    let consumer: EventConsumer = Arc::new(move |_shard_id, name, payload| {
        captured.lock().unwrap().push((name, payload));
        Box::pin(async {})
    });
    (consumer, events)
}

#[tokio::test]
async fn fresh_identify_reaches_ready() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (consumer, events) = recording_consumer();

    let config = Config::builder("token", format!("ws://{}", addr))
        .intents(Intents::GUILDS)
        .compression(false)
        .build();
    let supervisor = Arc::new(Supervisor::new(config, consumer));

    let server = tokio::spawn(async move {
        let mut ws = accept_one(&listener).await;
        send_json(&mut ws, json!({"op": 10, "d": {"heartbeat_interval": 45_000}})).await;

        let identify = next_json(&mut ws).await;
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "token");

        send_json(&mut ws, json!({"op": 0, "t": "READY", "s": 1, "d": {"session_id": "abc"}})).await;
        ws
    });

    supervisor.start().await.expect("fresh identify should reach ready");
    server.await.expect("server task panicked");

    assert_eq!(supervisor.state(), Stage::Ready);
    assert_eq!(supervisor.session_id().as_deref(), Some("abc"));
    assert_eq!(supervisor.seq(), Some(1));

    // The dispatch closure runs in a detached task; give it one scheduler turn.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let names: Vec<_> = events.lock().unwrap().iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(names, vec!["CONNECTED".to_owned(), "READY".to_owned()]);

    supervisor.close().await;
    assert_eq!(supervisor.state(), Stage::Stopped);
}

#[tokio::test]
async fn heartbeat_cycle_produces_finite_latency() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (consumer, _events) = recording_consumer();

    let config = Config::builder("token", format!("ws://{}", addr)).compression(false).build();
    let supervisor = Arc::new(Supervisor::new(config, consumer));

    let server = tokio::spawn(async move {
        let mut ws = accept_one(&listener).await;
        send_json(&mut ws, json!({"op": 10, "d": {"heartbeat_interval": 200}})).await;
        let _identify = next_json(&mut ws).await;
        send_json(&mut ws, json!({"op": 0, "t": "READY", "s": 1, "d": {"session_id": "abc"}})).await;

        let heartbeat = next_json(&mut ws).await;
        assert_eq!(heartbeat["op"], 1);
        send_json(&mut ws, json!({"op": 11})).await;
        ws
    });

    supervisor.start().await.expect("handshake should reach ready before the heartbeat cycle runs");
    server.await.expect("server task panicked");

    // The ack races the next poll; give it time to land.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let latency = supervisor.heartbeat_latency().expect("latency should have been recorded");
    assert!(latency < Duration::from_secs(5));

    supervisor.close().await;
}

#[tokio::test]
async fn fatal_close_code_ends_the_supervisor_without_a_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (consumer, _events) = recording_consumer();

    let config = Config::builder("token", format!("ws://{}", addr)).compression(false).build();
    let supervisor = Arc::new(Supervisor::new(config, consumer));

    let server = tokio::spawn(async move {
        let mut ws = accept_one(&listener).await;
        send_json(&mut ws, json!({"op": 10, "d": {"heartbeat_interval": 45_000}})).await;
        let _identify = next_json(&mut ws).await;
        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(4004),
            reason: "authentication failed".into(),
        })))
        .await
        .expect("close send failed");
    });

    let result = supervisor.start().await;
    server.await.expect("server task panicked");
    supervisor.join().await;

    assert_eq!(result, Err(TerminationError::ServerClose { code: 4004 }));
    assert_eq!(supervisor.state(), Stage::WaitingForReady);
    assert_eq!(supervisor.final_error(), Some(TerminationError::ServerClose { code: 4004 }));
}

#[tokio::test]
async fn close_unblocks_an_indefinitely_retrying_supervisor() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (consumer, _events) = recording_consumer();

    let config = Config::builder("token", format!("ws://{}", addr)).compression(false).build();
    let supervisor = Arc::new(Supervisor::new(config, consumer));

    // The server accepts once, completes the upgrade, then drops the
    // connection with no HELLO. The attempt fails non-fatally and every
    // later attempt is refused (nothing else is listening), so the
    // keep-alive loop would retry forever on its own; `close()` must still
    // win the race against whatever backoff sleep it's sitting in.
    let server = tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        drop(tokio_tungstenite::accept_async(stream).await.unwrap());
    });

    let start_supervisor = Arc::clone(&supervisor);
    let start_task = tokio::spawn(async move {
        let _ = start_supervisor.start().await;
    });
    server.await.expect("server task panicked");

    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(5), supervisor.close())
        .await
        .expect("close() should not block on an in-flight reconnect attempt");

    tokio::time::timeout(Duration::from_secs(5), start_task)
        .await
        .expect("start() should have returned once closed")
        .unwrap();

    assert_eq!(supervisor.state(), Stage::Stopped);
}
