//! Integration tests for the per-job connection manager.
//!
//! Each test runs a local WebSocket server on an ephemeral port and drives
//! a real [`ConnectionManager`] against it, with shortened timer settings.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use vimax_jobsync::events::SyncEvent;
use vimax_jobsync::job::{Job, JobStatus};
use vimax_jobsync::{ConnectionManager, ConnectionState, JobSession, Phase, SyncConfig};

type ServerSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    /// Request paths of every completed handshake, in order.
    paths: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    fn connections(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

/// Accept WebSocket connections forever, handing each to `handler`
/// together with its 1-based connection number.
async fn spawn_server<F, Fut>(handler: F) -> TestServer
where
    F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let paths = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&paths);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let sink = Arc::clone(&recorded);
            let record_path = move |req: &Request, resp: Response| {
                sink.lock().unwrap().push(req.uri().path().to_string());
                Ok(resp)
            };
            if let Ok(ws) = accept_hdr_async(stream, record_path).await {
                let n = recorded.lock().unwrap().len();
                tokio::spawn(handler(n, ws));
            }
        }
    });

    TestServer { addr, paths }
}

/// An address nothing listens on.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Accepts TCP connections and drops each one before the WebSocket
/// handshake. Returns the address and the number of accepted connections.
async fn spawn_refusing_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    (addr, accepted)
}

fn fast_config(addr: SocketAddr) -> SyncConfig {
    let mut config = SyncConfig::new(format!("ws://{addr}"));
    config.heartbeat_interval = Duration::from_secs(60);
    config.reconnect.initial_delay = Duration::from_millis(20);
    config.reconnect.max_delay = Duration::from_millis(100);
    config.close_timeout = Duration::from_millis(200);
    config
}

async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn next_text(ws: &mut ServerSocket) -> Option<String> {
    while let Some(Ok(msg)) = ws.next().await {
        if let Message::Text(text) = msg {
            return Some(text);
        }
    }
    None
}

/// Keep reading until the client goes away.
async fn drain(mut ws: ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

async fn wait_state(
    rx: &mut watch::Receiver<ConnectionState>,
    pred: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection task exited")
        .clone()
}

async fn wait_job(rx: &mut watch::Receiver<Job>, pred: impl FnMut(&Job) -> bool) -> Job {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for job snapshot")
        .expect("connection task exited")
        .clone()
}

async fn wait_connected(manager: &ConnectionManager) -> ConnectionState {
    let mut rx = manager.watch_connection();
    wait_state(&mut rx, |s| s.phase() == Phase::Connected).await
}

// ---------------------------------------------------------------------------
// Heartbeat and control frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_ping_is_answered_with_pong_without_state_change() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = spawn_server(move |_, mut ws| {
        let tx = tx.clone();
        async move {
            send_json(&mut ws, json!({"type": "ping"})).await;
            if let Some(reply) = next_text(&mut ws).await {
                let _ = tx.send(reply);
            }
            drain(ws).await;
        }
    })
    .await;

    let mut manager = ConnectionManager::start(&fast_config(server.addr), "abc").unwrap();
    let reply = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply, json!({"type": "pong"}));

    let state = manager.connection_state();
    assert_eq!(state.phase(), Phase::Connected);
    assert_eq!(state.reconnect_attempts(), 0);
    assert_eq!(manager.job(), Job::new("abc"));
    assert_eq!(server.paths(), vec!["/ws/job/abc".to_string()]);

    manager.stop().await;
}

#[tokio::test]
async fn heartbeat_sends_ping_while_connected() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = spawn_server(move |_, mut ws| {
        let tx = tx.clone();
        async move {
            while let Some(text) = next_text(&mut ws).await {
                let _ = tx.send(text);
            }
        }
    })
    .await;

    let mut config = fast_config(server.addr);
    config.heartbeat_interval = Duration::from_millis(50);
    let mut manager = ConnectionManager::start(&config, "job_hb").unwrap();

    for _ in 0..2 {
        let frame = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame, json!({"type": "ping"}));
    }
    assert_eq!(manager.connection_state().phase(), Phase::Connected);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn default_heartbeat_pings_once_per_interval_until_close() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = spawn_server(move |_, mut ws| {
        let tx = tx.clone();
        async move {
            let mut pings = 0;
            while let Some(text) = next_text(&mut ws).await {
                let frame: Value = serde_json::from_str(&text).unwrap();
                if frame == json!({"type": "ping"}) {
                    let _ = tx.send(Instant::now());
                    pings += 1;
                    if pings == 2 {
                        let _ = ws.close(None).await;
                    }
                }
            }
        }
    })
    .await;

    let config = SyncConfig::new(format!("ws://{}", server.addr));
    let mut manager = ConnectionManager::start(&config, "job_heartbeat").unwrap();
    let mut states = manager.watch_connection();
    states
        .wait_for(|s| s.phase() == Phase::Connected)
        .await
        .expect("connection task exited");
    let opened = Instant::now();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();

    // Exactly one ping by 25 s, exactly two by 50 s.
    let interval = Duration::from_secs(25);
    assert!(first - opened >= interval && first - opened < interval * 2);
    assert!(second - opened >= interval * 2 && second - opened < interval * 3);
    assert_eq!(second - first, interval);

    states
        .wait_for(|s| s.phase() == Phase::Disconnected)
        .await
        .expect("connection task exited");

    // Several intervals later the cancelled heartbeat has sent nothing.
    tokio::time::sleep(interval * 4).await;
    assert_matches!(rx.try_recv(), Err(_));
    assert_eq!(manager.connection_state().phase(), Phase::Disconnected);

    manager.stop().await;
}

// ---------------------------------------------------------------------------
// Status updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sequential_status_frames_merge_into_snapshot() {
    let server = spawn_server(|_, mut ws| async move {
        send_json(
            &mut ws,
            json!({
                "status": "processing",
                "current_step": "Story Generation",
                "steps": [
                    {"name": "Story Generation", "status": "in_progress", "estimated_time": 30},
                    {"name": "Character Extraction", "status": "pending", "estimated_time": 20}
                ]
            }),
        )
        .await;
        send_json(&mut ws, json!({"progress": 10})).await;
        send_json(&mut ws, json!({"progress": 45, "status": "processing"})).await;
        drain(ws).await;
    })
    .await;

    let mut manager = ConnectionManager::start(&fast_config(server.addr), "job_merge").unwrap();
    let mut jobs = manager.watch_job();
    let job = wait_job(&mut jobs, |j| j.progress == 45.0).await;

    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.steps.len(), 2);
    assert_eq!(job.steps[0].name, "Story Generation");
    assert_eq!(job.current_step().map(|s| s.name.as_str()), Some("Story Generation"));
    assert!(job.updated_at.is_some());

    manager.stop().await;
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_connection_survives() {
    let server = spawn_server(|_, mut ws| async move {
        ws.send(Message::Text("not json at all".to_string())).await.unwrap();
        ws.send(Message::Text("[1,2,3]".to_string())).await.unwrap();
        send_json(&mut ws, json!({"type": "subscribe"})).await;
        send_json(&mut ws, json!({"progress": "ten"})).await;
        send_json(&mut ws, json!({"progress": 5})).await;
        drain(ws).await;
    })
    .await;

    let mut manager = ConnectionManager::start(&fast_config(server.addr), "job_bad").unwrap();
    let mut jobs = manager.watch_job();
    let job = wait_job(&mut jobs, |j| j.progress == 5.0).await;

    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(manager.connection_state().phase(), Phase::Connected);
    assert_eq!(manager.connection_state().reconnect_attempts(), 0);
    assert_eq!(server.connections(), 1);

    manager.stop().await;
}

#[tokio::test]
async fn seeded_snapshot_is_kept_until_updated() {
    let server = spawn_server(|_, mut ws| async move {
        send_json(&mut ws, json!({"message": "Assembling video"})).await;
        drain(ws).await;
    })
    .await;

    let mut seed = Job::new("job_seed");
    seed.progress = 75.0;
    seed.status = JobStatus::Processing;

    let mut manager = ConnectionManager::start_from(&fast_config(server.addr), seed).unwrap();
    let mut jobs = manager.watch_job();
    let job = wait_job(&mut jobs, |j| j.message.is_some()).await;

    assert_eq!(job.progress, 75.0);
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.message.as_deref(), Some("Assembling video"));

    manager.stop().await;
}

// ---------------------------------------------------------------------------
// Close handling and reconnects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_close_disconnects_without_retry() {
    let close_now = Arc::new(Notify::new());
    let trigger = Arc::clone(&close_now);
    let server = spawn_server(move |_, mut ws| {
        let trigger = Arc::clone(&trigger);
        async move {
            trigger.notified().await;
            let _ = ws.close(None).await;
            drain(ws).await;
        }
    })
    .await;

    let mut manager = ConnectionManager::start(&fast_config(server.addr), "job_clean").unwrap();
    wait_connected(&manager).await;

    close_now.notify_one();
    let mut states = manager.watch_connection();
    let state = wait_state(&mut states, |s| s.phase() == Phase::Disconnected).await;
    assert!(!state.retry_pending());
    assert_eq!(state.reconnect_attempts(), 0);

    // Several backoff periods later nothing has reconnected.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let state = manager.connection_state();
    assert_eq!(state.phase(), Phase::Disconnected);
    assert!(!state.retry_pending());
    assert_eq!(server.connections(), 1);

    manager.stop().await;
}

#[tokio::test]
async fn unclean_drop_reconnects_and_resets_attempts() {
    let drop_now = Arc::new(Notify::new());
    let trigger = Arc::clone(&drop_now);
    let server = spawn_server(move |n, ws| {
        let trigger = Arc::clone(&trigger);
        async move {
            if n == 1 {
                trigger.notified().await;
                drop(ws);
            } else {
                drain(ws).await;
            }
        }
    })
    .await;

    let mut manager = ConnectionManager::start(&fast_config(server.addr), "job_drop").unwrap();
    wait_connected(&manager).await;
    let mut events = manager.subscribe();

    drop_now.notify_one();
    let paths = Arc::clone(&server.paths);
    let mut states = manager.watch_connection();
    let state = wait_state(&mut states, |s| {
        s.phase() == Phase::Connected && paths.lock().unwrap().len() == 2
    })
    .await;
    assert_eq!(state.reconnect_attempts(), 0);

    let mut scheduled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::ReconnectScheduled {
            attempt, delay_ms, ..
        } = event
        {
            scheduled.push((attempt, delay_ms));
        }
    }
    assert_eq!(scheduled, vec![(1, 20)]);

    manager.stop().await;
}

#[tokio::test]
async fn exhausted_reconnects_end_in_failed() {
    let (addr, accepted) = spawn_refusing_server().await;
    let mut config = fast_config(addr);
    config.reconnect.initial_delay = Duration::from_millis(5);
    config.reconnect.max_delay = Duration::from_millis(20);

    let mut manager = ConnectionManager::start(&config, "job_fail").unwrap();
    let mut events = manager.subscribe();
    let mut states = manager.watch_connection();

    let state = wait_state(&mut states, |s| s.phase() == Phase::Failed).await;
    assert_eq!(state.reconnect_attempts(), 5);
    assert!(!state.retry_pending());

    let mut delays = Vec::new();
    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::ReconnectScheduled { delay_ms, .. } => delays.push(delay_ms),
            SyncEvent::ConnectionFailed { attempts, .. } => {
                assert_eq!(attempts, 5);
                failed += 1;
            }
            _ => {}
        }
    }
    assert_eq!(delays, vec![5, 10, 20, 20, 20]);
    assert_eq!(failed, 1);
    // The initial connect plus four reconnects; the last wait ends in failure.
    assert_eq!(accepted.load(Ordering::SeqCst), 5);

    // Terminal: no further transitions.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.connection_state().phase(), Phase::Failed);
    assert_matches!(events.try_recv(), Err(_));
    assert_eq!(accepted.load(Ordering::SeqCst), 5);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn default_backoff_doubles_from_one_second() {
    let addr = closed_port().await;
    let config = SyncConfig::new(format!("ws://{addr}"));

    let mut manager = ConnectionManager::start(&config, "job_backoff").unwrap();
    let mut events = manager.subscribe();
    let mut states = manager.watch_connection();

    let started = tokio::time::Instant::now();
    tokio::time::timeout(
        Duration::from_secs(120),
        states.wait_for(|s| s.phase() == Phase::Failed),
    )
    .await
    .expect("timed out waiting for failure")
    .expect("connection task exited");
    assert!(started.elapsed() >= Duration::from_secs(31));

    let mut delays = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::ReconnectScheduled { delay_ms, .. } = event {
            delays.push(delay_ms);
        }
    }
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

    manager.stop().await;
}

// ---------------------------------------------------------------------------
// Disposal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_mid_backoff_prevents_further_transitions() {
    let addr = closed_port().await;
    let mut config = fast_config(addr);
    config.reconnect.initial_delay = Duration::from_secs(30);
    config.reconnect.max_delay = Duration::from_secs(30);

    let mut manager = ConnectionManager::start(&config, "job_stop").unwrap();
    let mut states = manager.watch_connection();
    wait_state(&mut states, |s| s.retry_pending()).await;

    manager.stop().await;
    assert!(!manager.is_running());

    let state = states.borrow_and_update().clone();
    assert_eq!(state.phase(), Phase::Disconnected);
    assert!(!state.retry_pending());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!states.has_changed().unwrap_or(false));

    // Idempotent.
    manager.stop().await;
    assert_eq!(manager.connection_state().phase(), Phase::Disconnected);
}

#[tokio::test]
async fn dropping_manager_closes_channel() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = spawn_server(move |_, ws| {
        let tx = tx.clone();
        async move {
            drain(ws).await;
            let _ = tx.send(());
        }
    })
    .await;

    let manager = ConnectionManager::start(&fast_config(server.addr), "job_drop_handle").unwrap();
    wait_connected(&manager).await;
    let mut states = manager.watch_connection();
    let mut jobs = manager.watch_job();
    drop(manager);

    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("server never saw the channel close");

    // The task is gone along with its timers and publishers.
    tokio::time::timeout(WAIT, async {
        while states.changed().await.is_ok() {}
        while jobs.changed().await.is_ok() {}
    })
    .await
    .expect("connection task outlived its manager");
}

// ---------------------------------------------------------------------------
// Job switching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn switching_jobs_stops_previous_connection_first() {
    let server = spawn_server(|_, ws| drain(ws)).await;
    let mut session = JobSession::new(fast_config(server.addr));

    let first = session.watch("job_a").await.unwrap();
    let mut first_states = first.watch_connection();
    wait_state(&mut first_states, |s| s.phase() == Phase::Connected).await;

    let second = session.watch("job_b").await.unwrap();
    assert_eq!(second.job_id(), "job_b");

    // The old manager finished before the new one was created.
    assert_eq!(first_states.borrow().phase(), Phase::Disconnected);
    assert!(first_states.has_changed().is_err());

    let mut second_states = second.watch_connection();
    wait_state(&mut second_states, |s| s.phase() == Phase::Connected).await;

    // Re-watching the active job keeps its connection.
    session.watch("job_b").await.unwrap();
    assert_eq!(
        server.paths(),
        vec!["/ws/job/job_a".to_string(), "/ws/job/job_b".to_string()]
    );

    session.clear().await;
    assert!(session.current().is_none());
}

#[tokio::test]
async fn restart_carries_snapshot_over() {
    let addr = closed_port().await;
    let mut config = fast_config(addr);
    config.reconnect.max_attempts = 1;
    config.reconnect.initial_delay = Duration::from_millis(5);

    let mut session = JobSession::new(config);
    let mut seed = Job::new("job_restart");
    seed.progress = 30.0;

    let manager = session.watch_from(seed).await.unwrap();
    let mut states = manager.watch_connection();
    wait_state(&mut states, |s| s.phase() == Phase::Failed).await;

    let restarted = session.restart().await.unwrap().expect("active job");
    assert_eq!(restarted.job_id(), "job_restart");
    assert_eq!(restarted.job().progress, 30.0);
    assert_ne!(restarted.connection_state().phase(), Phase::Failed);

    session.clear().await;
}

#[tokio::test]
async fn invalid_job_id_is_rejected() {
    let config = SyncConfig::new("ws://127.0.0.1:1");
    assert!(ConnectionManager::start(&config, "../../etc").is_err());
    assert!(ConnectionManager::start(&config, "").is_err());

    let mut session = JobSession::new(config);
    assert!(session.watch("job 1").await.is_err());
    assert!(session.current().is_none());
}
