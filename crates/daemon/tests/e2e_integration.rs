//! End-to-end integration tests for termbridge.
//!
//! These tests verify complete flows work correctly:
//! - Server startup and shutdown
//! - Terminal start, input, output, kill over a real WebSocket
//! - Sandbox rejection of working directories
//! - Connection loss teardown and isolation between connections

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use daemon::config::Config;
use daemon::orchestrator::{Orchestrator, OrchestratorState};
use daemon::sandbox::SandboxResolver;
use daemon::session::{
    NativePtyBackend, SessionManager, SessionManagerImpl, SessionRegistry, SessionStatus,
    UnsupportedPtyBackend,
};
use daemon::transport::Transport;
use futures_util::{SinkExt, StreamExt};
use protocol::{
    ClientEvent, ErrorCode, ServerEvent, TerminalInput, TerminalKill, TerminalStart,
};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Create a test configuration rooted in a temporary sandbox.
fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join("project")).unwrap();

    let mut config = Config::default();
    config.sandbox.root = temp_dir.path().to_path_buf();
    config.server.bind = "127.0.0.1:0".to_string();
    config.session.default_shell = "/bin/sh".to_string();
    (config, temp_dir)
}

async fn start_server(orchestrator: &mut Orchestrator) -> String {
    orchestrator.start().await.unwrap();
    format!("ws://{}", orchestrator.local_addr().unwrap())
}

async fn connect(url: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("failed to connect");
    ws
}

async fn send(ws: &mut Client, event: ClientEvent) {
    ws.send(WsMessage::Text(event.to_json().unwrap()))
        .await
        .expect("failed to send");
}

async fn start_terminal(ws: &mut Client, id: &str, cwd: &str) {
    send(ws, ClientEvent::TerminalStart(TerminalStart::new(id, cwd))).await;
}

async fn input(ws: &mut Client, id: &str, data: &str) {
    send(
        ws,
        ClientEvent::TerminalInput(TerminalInput {
            terminal_id: id.to_string(),
            data: data.to_string(),
        }),
    )
    .await;
}

async fn kill(ws: &mut Client, id: &str) {
    send(
        ws,
        ClientEvent::TerminalKill(TerminalKill {
            terminal_id: id.to_string(),
        }),
    )
    .await;
}

/// Reads server events until `done` returns true or `limit` elapses.
async fn collect_until<F>(ws: &mut Client, limit: Duration, mut done: F) -> Vec<ServerEvent>
where
    F: FnMut(&[ServerEvent]) -> bool,
{
    let deadline = Instant::now() + limit;
    let mut events = Vec::new();

    while Instant::now() < deadline {
        let remaining = deadline - Instant::now();
        match timeout(remaining, ws.next()).await {
            Ok(Some(Ok(WsMessage::Text(text)))) => {
                events.push(ServerEvent::from_json(&text).expect("server sent invalid event"));
                if done(&events) {
                    break;
                }
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) | Err(_) => break,
        }
    }

    events
}

fn output_text(events: &[ServerEvent], id: &str) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::TerminalOutput(out) if out.terminal_id == id => Some(out.data.as_str()),
            _ => None,
        })
        .collect()
}

fn close_count(events: &[ServerEvent], id: &str) -> usize {
    events
        .iter()
        .filter(|event| event.is_close() && event.terminal_id() == id)
        .count()
}

async fn wait_for_sessions(orchestrator: &Orchestrator, expected: usize) -> bool {
    for _ in 0..250 {
        if orchestrator.session_count() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// =============================================================================
// Orchestrator Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_orchestrator_state_starts_stopped() {
    let (config, _temp_dir) = create_test_config();
    let orchestrator = Orchestrator::new(config).unwrap();
    assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
}

#[tokio::test]
async fn test_orchestrator_stop_when_already_stopped() {
    let (config, _temp_dir) = create_test_config();
    let orchestrator = Orchestrator::new(config).unwrap();
    assert!(orchestrator.stop().await.is_ok());
}

#[tokio::test]
async fn test_orchestrator_binds_ephemeral_port() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator = Orchestrator::new(config).unwrap();

    let url = start_server(&mut orchestrator).await;
    assert!(url.starts_with("ws://127.0.0.1:"));
    assert_ne!(orchestrator.local_addr().unwrap().port(), 0);

    orchestrator.stop().await.unwrap();
}

// =============================================================================
// Terminal Flow Tests
// =============================================================================

#[tokio::test]
async fn test_echo_then_kill() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator = Orchestrator::new(config).unwrap();
    let url = start_server(&mut orchestrator).await;
    let mut ws = connect(&url).await;

    start_terminal(&mut ws, "t1", "/project").await;
    input(&mut ws, "t1", "echo hi_$((1+1))\n").await;

    let events = collect_until(&mut ws, Duration::from_secs(5), |events| {
        output_text(events, "t1").contains("hi_2")
    })
    .await;
    assert!(
        output_text(&events, "t1").contains("hi_2"),
        "expected echoed output, got {events:?}"
    );
    assert_eq!(orchestrator.session_count(), 1);

    kill(&mut ws, "t1").await;

    let events = collect_until(&mut ws, Duration::from_secs(5), |events| {
        close_count(events, "t1") == 1
    })
    .await;
    assert_eq!(close_count(&events, "t1"), 1);
    assert!(wait_for_sessions(&orchestrator, 0).await);

    // Nothing follows the close, and late input is ignored
    input(&mut ws, "t1", "echo late\n").await;
    let late = collect_until(&mut ws, Duration::from_millis(500), |_| false).await;
    assert!(late.is_empty(), "unexpected events after close: {late:?}");

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_natural_exit_closes_terminal() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator = Orchestrator::new(config).unwrap();
    let url = start_server(&mut orchestrator).await;
    let mut ws = connect(&url).await;

    start_terminal(&mut ws, "t1", "/").await;
    input(&mut ws, "t1", "exit\n").await;

    let events = collect_until(&mut ws, Duration::from_secs(5), |events| {
        close_count(events, "t1") == 1
    })
    .await;

    assert_eq!(close_count(&events, "t1"), 1);
    assert!(events.last().unwrap().is_close());
    assert!(wait_for_sessions(&orchestrator, 0).await);

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_escaping_cwd_rejected() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator = Orchestrator::new(config).unwrap();
    let url = start_server(&mut orchestrator).await;
    let mut ws = connect(&url).await;

    start_terminal(&mut ws, "bad", "../../etc").await;

    let events = collect_until(&mut ws, Duration::from_millis(800), |_| false).await;

    assert_eq!(events.len(), 1, "expected a single error, got {events:?}");
    match &events[0] {
        ServerEvent::TerminalError(err) => {
            assert_eq!(err.terminal_id, "bad");
            assert_eq!(err.code, ErrorCode::InvalidWorkingDirectory);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(output_text(&events, "bad"), "");
    assert_eq!(orchestrator.session_count(), 0);

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_start_is_noop() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator = Orchestrator::new(config).unwrap();
    let url = start_server(&mut orchestrator).await;
    let mut ws = connect(&url).await;

    start_terminal(&mut ws, "t1", "/").await;
    start_terminal(&mut ws, "t1", "/").await;
    input(&mut ws, "t1", "echo dup_check_$((3*3))\n").await;

    let events = collect_until(&mut ws, Duration::from_secs(5), |events| {
        output_text(events, "t1").contains("dup_check_9")
    })
    .await;

    assert!(output_text(&events, "t1").contains("dup_check_9"));
    assert!(events
        .iter()
        .all(|e| !matches!(e, ServerEvent::TerminalError(_))));
    assert_eq!(orchestrator.session_count(), 1);

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_is_ignored() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator = Orchestrator::new(config).unwrap();
    let url = start_server(&mut orchestrator).await;
    let mut ws = connect(&url).await;

    ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
    ws.send(WsMessage::Text(r#"{"event":"fs_delete","data":{}}"#.to_string()))
        .await
        .unwrap();

    start_terminal(&mut ws, "t1", "/").await;
    input(&mut ws, "t1", "echo still_ok\n").await;

    let events = collect_until(&mut ws, Duration::from_secs(5), |events| {
        output_text(events, "t1").contains("still_ok")
    })
    .await;
    assert!(output_text(&events, "t1").contains("still_ok"));

    orchestrator.stop().await.unwrap();
}

// =============================================================================
// Connection Isolation Tests
// =============================================================================

#[tokio::test]
async fn test_disconnect_tears_down_only_own_sessions() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator = Orchestrator::new(config).unwrap();
    let url = start_server(&mut orchestrator).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    // Same terminal id on both connections
    start_terminal(&mut a, "t1", "/").await;
    start_terminal(&mut a, "t2", "/").await;
    start_terminal(&mut b, "t1", "/").await;
    assert!(wait_for_sessions(&orchestrator, 3).await);

    a.close(None).await.unwrap();
    drop(a);
    assert!(wait_for_sessions(&orchestrator, 1).await);

    input(&mut b, "t1", "echo b_alive\n").await;
    let events = collect_until(&mut b, Duration::from_secs(5), |events| {
        output_text(events, "t1").contains("b_alive")
    })
    .await;
    assert!(output_text(&events, "t1").contains("b_alive"));
    assert_eq!(close_count(&events, "t1"), 0);

    let info = orchestrator.session_manager().list();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].status, SessionStatus::Running);

    orchestrator.stop().await.unwrap();
    assert_eq!(orchestrator.session_count(), 0);
}

#[tokio::test]
async fn test_input_for_other_connections_session_is_ignored() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator = Orchestrator::new(config).unwrap();
    let url = start_server(&mut orchestrator).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    start_terminal(&mut a, "only_a", "/").await;
    assert!(wait_for_sessions(&orchestrator, 1).await);

    // b cannot reach a's terminal
    kill(&mut b, "only_a").await;
    let events = collect_until(&mut b, Duration::from_millis(500), |_| false).await;
    assert!(events.is_empty());
    assert_eq!(orchestrator.session_count(), 1);

    orchestrator.stop().await.unwrap();
}

// =============================================================================
// Platform Capability Tests
// =============================================================================

#[tokio::test]
async fn test_unsupported_platform_reports_then_closes() {
    let (config, _temp_dir) = create_test_config();
    let mut orchestrator =
        Orchestrator::with_backend(config, Arc::new(UnsupportedPtyBackend)).unwrap();
    let url = start_server(&mut orchestrator).await;
    let mut ws = connect(&url).await;

    start_terminal(&mut ws, "t1", "/").await;

    let events = collect_until(&mut ws, Duration::from_secs(2), |events| {
        close_count(events, "t1") == 1
    })
    .await;

    assert_eq!(events.len(), 2, "got {events:?}");
    assert!(output_text(&events, "t1").contains("not supported"));
    assert!(events[1].is_close());
    assert_eq!(orchestrator.session_count(), 0);

    orchestrator.stop().await.unwrap();
}

// =============================================================================
// Ordering Tests
// =============================================================================

/// Transport that checks the registry the moment output is delivered.
#[derive(Default)]
struct RegistryProbe {
    registry: OnceLock<Arc<SessionRegistry>>,
    observed: Mutex<Vec<Option<SessionStatus>>>,
}

impl Transport for RegistryProbe {
    fn send(&self, connection: &str, event: ServerEvent) -> bool {
        if let ServerEvent::TerminalOutput(out) = &event {
            let mut observed = self.observed.lock().unwrap();
            if !observed.is_empty() {
                return true;
            }
            let status = self
                .registry
                .get()
                .and_then(|registry| registry.lookup(connection, &out.terminal_id))
                .map(|session| session.status());
            observed.push(status);
        }
        true
    }
}

#[tokio::test]
async fn test_session_registered_before_first_output() {
    let temp_dir = TempDir::new().unwrap();
    let probe = Arc::new(RegistryProbe::default());

    let settings = daemon::config::SessionConfig {
        default_shell: "/bin/sh".to_string(),
        ..Default::default()
    };
    let manager = SessionManagerImpl::new(
        settings,
        SandboxResolver::new(temp_dir.path()).unwrap(),
        Arc::new(NativePtyBackend),
        probe.clone(),
    );
    assert!(probe.registry.set(Arc::clone(manager.registry())).is_ok());

    manager.start("conn", "t1", "/", (None, None)).await.unwrap();
    manager.write("conn", "t1", b"echo probe\n").await.unwrap();

    let mut seen = false;
    for _ in 0..250 {
        if !probe.observed.lock().unwrap().is_empty() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen, "no output observed");

    let observed = probe.observed.lock().unwrap().clone();
    assert_eq!(observed[0], Some(SessionStatus::Running));

    manager.shutdown();
}
