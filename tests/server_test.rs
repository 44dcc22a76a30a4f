// Integration test for the session server.
//
// Starts a server on localhost, connects plain TCP clients, and exercises
// the full population lifecycle: waiting below the minimum, start at the
// minimum, pause on disconnect, resume on rejoin, rejection at capacity,
// input forwarding, and graceful shutdown. Engine hook calls are observed
// through a channel-backed GameEngine implementation.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use padlink_server::config::ServerConfig;
use padlink_server::engine::GameEngine;
use padlink_server::metrics::Metrics;
use padlink_server::net::framing::read_message;
use padlink_server::net::protocol::ControlMessage;
use padlink_server::net::server::{ServerError, SessionServer, ShutdownHandle};
use padlink_server::net::session::PlayerId;

#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineCall {
    Add(String),
    Remove(String),
    Start,
    Pause,
    Resume,
    Input(String, Vec<u8>),
}

/// Engine that forwards every hook call to the test over a channel.
struct ChannelEngine {
    tx: mpsc::UnboundedSender<EngineCall>,
}

impl GameEngine for ChannelEngine {
    fn add_player(&mut self, id: &PlayerId) {
        let _ = self.tx.send(EngineCall::Add(id.as_str().to_string()));
    }
    fn remove_player(&mut self, id: &PlayerId) {
        let _ = self.tx.send(EngineCall::Remove(id.as_str().to_string()));
    }
    fn start(&mut self) {
        let _ = self.tx.send(EngineCall::Start);
    }
    fn pause(&mut self) {
        let _ = self.tx.send(EngineCall::Pause);
    }
    fn resume(&mut self) {
        let _ = self.tx.send(EngineCall::Resume);
    }
    fn input(&mut self, id: &PlayerId, payload: &[u8]) {
        let _ = self.tx.send(EngineCall::Input(
            id.as_str().to_string(),
            payload.to_vec(),
        ));
    }
}

struct TestServer {
    addr: SocketAddr,
    handle: ShutdownHandle,
    task: JoinHandle<Result<(), ServerError>>,
    calls: mpsc::UnboundedReceiver<EngineCall>,
    metrics: Arc<Metrics>,
}

/// Start a server on a random loopback port.
fn start_server(min_players: usize, max_players: usize) -> TestServer {
    let config = ServerConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        min_players,
        max_players,
    };
    let (tx, calls) = mpsc::unbounded_channel();
    let metrics = Arc::new(Metrics::new());
    let server = SessionServer::bind(&config, ChannelEngine { tx }, metrics.clone()).unwrap();
    let addr = server.local_addr();
    let handle = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    TestServer {
        addr,
        handle,
        task,
        calls,
        metrics,
    }
}

/// Read the next framed control message, with a deadline.
async fn expect_control(stream: &mut TcpStream, expected: ControlMessage) {
    let bytes = timeout(Duration::from_secs(5), read_message(stream))
        .await
        .expect("timed out waiting for control message")
        .expect("control channel closed unexpectedly");
    assert_eq!(
        ControlMessage::from_token(&bytes),
        Some(expected),
        "unexpected control message"
    );
}

/// Receive the next engine hook call, with a deadline.
async fn expect_call(calls: &mut mpsc::UnboundedReceiver<EngineCall>) -> EngineCall {
    timeout(Duration::from_secs(5), calls.recv())
        .await
        .expect("timed out waiting for engine call")
        .expect("engine call channel closed")
}

fn expected_id(stream: &TcpStream) -> String {
    format!("@{}", stream.local_addr().unwrap().port())
}

#[tokio::test]
async fn full_session_lifecycle() {
    let mut server = start_server(2, 2);

    // 1. First player connects: below the minimum, told to wait.
    let mut a = TcpStream::connect(server.addr).await.unwrap();
    let id_a = expected_id(&a);
    expect_control(&mut a, ControlMessage::WaitForPlayer).await;
    assert_eq!(
        expect_call(&mut server.calls).await,
        EngineCall::Add(id_a.clone())
    );

    // 2. Second player connects: minimum reached, both hear START_GAME and
    //    the engine starts exactly once.
    let mut b = TcpStream::connect(server.addr).await.unwrap();
    let id_b = expected_id(&b);
    expect_control(&mut a, ControlMessage::StartGame).await;
    expect_control(&mut b, ControlMessage::StartGame).await;
    assert_eq!(
        expect_call(&mut server.calls).await,
        EngineCall::Add(id_b.clone())
    );
    assert_eq!(expect_call(&mut server.calls).await, EngineCall::Start);
    assert_eq!(server.metrics.players_connected.load(Ordering::Relaxed), 2);

    // 3. Player input is forwarded raw, tagged with the sender's identity.
    a.write_all(b"LEFT").await.unwrap();
    assert_eq!(
        expect_call(&mut server.calls).await,
        EngineCall::Input(id_a.clone(), b"LEFT".to_vec())
    );

    // 4. Second player disconnects: population drops below the minimum, the
    //    remaining player hears PAUSE_GAME.
    drop(b);
    expect_control(&mut a, ControlMessage::PauseGame).await;
    assert_eq!(expect_call(&mut server.calls).await, EngineCall::Remove(id_b));
    assert_eq!(expect_call(&mut server.calls).await, EngineCall::Pause);

    // 5. A new player connects: the session resumes (RESUME_GAME, not a
    //    second START_GAME, because the session already started once).
    let mut c = TcpStream::connect(server.addr).await.unwrap();
    let id_c = expected_id(&c);
    expect_control(&mut a, ControlMessage::ResumeGame).await;
    expect_control(&mut c, ControlMessage::ResumeGame).await;
    assert_eq!(expect_call(&mut server.calls).await, EngineCall::Add(id_c));
    assert_eq!(expect_call(&mut server.calls).await, EngineCall::Resume);

    // 6. Graceful shutdown: everyone hears GAME_STOPPED, then the server
    //    closes the connections and the run loop returns cleanly.
    server.handle.shutdown().await;
    expect_control(&mut a, ControlMessage::GameStopped).await;
    expect_control(&mut c, ControlMessage::GameStopped).await;
    assert!(read_message(&mut a).await.is_err());

    let result = timeout(Duration::from_secs(5), server.task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn connection_at_capacity_is_rejected_and_closed() {
    let mut server = start_server(1, 1);

    let mut a = TcpStream::connect(server.addr).await.unwrap();
    let id_a = expected_id(&a);
    expect_control(&mut a, ControlMessage::StartGame).await;
    assert_eq!(
        expect_call(&mut server.calls).await,
        EngineCall::Add(id_a.clone())
    );
    assert_eq!(expect_call(&mut server.calls).await, EngineCall::Start);

    // Session is full: the second connection is notified and closed, and is
    // never registered with the engine.
    let mut rejected = TcpStream::connect(server.addr).await.unwrap();
    expect_control(&mut rejected, ControlMessage::TooManyPlayers).await;
    assert!(read_message(&mut rejected).await.is_err());
    assert_eq!(
        server.metrics.connections_rejected.load(Ordering::Relaxed),
        1
    );

    // The seated player is unaffected: input still flows.
    a.write_all(b"FIRE").await.unwrap();
    assert_eq!(
        expect_call(&mut server.calls).await,
        EngineCall::Input(id_a, b"FIRE".to_vec())
    );

    server.handle.shutdown().await;
    let _ = timeout(Duration::from_secs(5), server.task).await;
}

#[tokio::test]
async fn input_payload_is_opaque() {
    let mut server = start_server(1, 2);

    let mut a = TcpStream::connect(server.addr).await.unwrap();
    let id_a = expected_id(&a);
    expect_control(&mut a, ControlMessage::StartGame).await;
    assert_eq!(
        expect_call(&mut server.calls).await,
        EngineCall::Add(id_a.clone())
    );
    assert_eq!(expect_call(&mut server.calls).await, EngineCall::Start);

    // Arbitrary bytes, including NUL and high bits, pass through untouched.
    let payload = [0x00u8, 0xFF, 0x7F, b'\n'];
    a.write_all(&payload).await.unwrap();
    assert_eq!(
        expect_call(&mut server.calls).await,
        EngineCall::Input(id_a, payload.to_vec())
    );

    server.handle.shutdown().await;
    let _ = timeout(Duration::from_secs(5), server.task).await;
}

#[tokio::test]
async fn lone_waiting_player_disconnect_does_not_pause() {
    let mut server = start_server(2, 4);

    let a = TcpStream::connect(server.addr).await.unwrap();
    let id_a = expected_id(&a);
    assert_eq!(
        expect_call(&mut server.calls).await,
        EngineCall::Add(id_a.clone())
    );
    drop(a);
    assert_eq!(expect_call(&mut server.calls).await, EngineCall::Remove(id_a));

    // A fresh pair still starts the session normally afterwards.
    let mut b = TcpStream::connect(server.addr).await.unwrap();
    expect_control(&mut b, ControlMessage::WaitForPlayer).await;
    let mut c = TcpStream::connect(server.addr).await.unwrap();
    expect_control(&mut b, ControlMessage::StartGame).await;
    expect_control(&mut c, ControlMessage::StartGame).await;

    let calls = drain_calls(&mut server.calls).await;
    assert!(calls.contains(&EngineCall::Start));
    assert!(!calls.contains(&EngineCall::Pause));

    server.handle.shutdown().await;
    let _ = timeout(Duration::from_secs(5), server.task).await;
}

/// Drain whatever engine calls are currently queued.
async fn drain_calls(calls: &mut mpsc::UnboundedReceiver<EngineCall>) -> Vec<EngineCall> {
    let mut drained = Vec::new();
    while let Ok(Some(call)) = timeout(Duration::from_millis(100), calls.recv()).await {
        drained.push(call);
        if drained.len() > 50 {
            break;
        }
    }
    drained
}
