// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests: a real supervisor streaming real temp files to a mock
//! collector that speaks the frame protocol over a local TCP socket.

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use tailpost::exporter::auth::{self, AgentIdentity};
use tailpost::exporter::retry::RetryConfig;
use tailpost::exporter::supervisor::{ConnectionSupervisor, SupervisorConfig};
use tailpost::exporter::tls::TlsOptions;
use tailpost::exporter::{FrameCodec, Message};
use tailpost::tail::MonitoredFile;

const SECRET: &str = "integration-secret";

#[derive(Default)]
struct CollectorState {
    lines: Mutex<Vec<(String, u64, String)>>,
    hellos: AtomicU32,
    accepted: AtomicU32,
    heartbeats: AtomicU32,
    /// Close the serving connection after this many lines, once.
    kill_after: Mutex<Option<usize>>,
}

struct Collector {
    addr: SocketAddr,
    state: Arc<CollectorState>,
}

impl Collector {
    async fn start(kill_after: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(CollectorState {
            kill_after: Mutex::new(kill_after),
            ..Default::default()
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((sock, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_conn(sock, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    fn lines(&self) -> Vec<(String, u64, String)> {
        self.state.lines.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(|(_, _, t)| t).collect()
    }

    fn line_count(&self) -> usize {
        self.state.lines.lock().unwrap().len()
    }

    fn hellos(&self) -> u32 {
        self.state.hellos.load(Ordering::SeqCst)
    }

    fn accepted(&self) -> u32 {
        self.state.accepted.load(Ordering::SeqCst)
    }

    fn heartbeats(&self) -> u32 {
        self.state.heartbeats.load(Ordering::SeqCst)
    }
}

async fn handle_conn(sock: TcpStream, state: Arc<CollectorState>) {
    let mut framed = Framed::new(sock, FrameCodec::new());

    let authenticated = match framed.next().await {
        Some(Ok(Message::Hello {
            client,
            timestamp_ms,
            nonce,
            proof,
        })) => {
            state.hellos.fetch_add(1, Ordering::SeqCst);
            auth::verify_proof(SECRET, &client, timestamp_ms, &nonce, &proof)
        }
        _ => return,
    };

    if !authenticated {
        let _ = framed
            .send(Message::Error {
                reason: "authentication failed".to_string(),
            })
            .await;
        return;
    }

    state.accepted.fetch_add(1, Ordering::SeqCst);
    if framed.send(Message::Welcome).await.is_err() {
        return;
    }

    while let Some(msg) = framed.next().await {
        match msg {
            Ok(Message::Line {
                file,
                sequence,
                text,
                ..
            }) => {
                state.lines.lock().unwrap().push((file, sequence, text));

                let mut kill = state.kill_after.lock().unwrap();
                if let Some(n) = *kill {
                    if n <= 1 {
                        // Simulate the collector dying mid-stream.
                        *kill = None;
                        return;
                    }
                    *kill = Some(n - 1);
                }
            }
            Ok(Message::Heartbeat) => {
                state.heartbeats.fetch_add(1, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

fn test_config(addr: SocketAddr, secret: &str) -> SupervisorConfig {
    SupervisorConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        identity: AgentIdentity {
            client: "test-agent".to_string(),
            secret: secret.to_string(),
        },
        use_tls: false,
        tls: TlsOptions::default(),
        poll_interval: Duration::from_millis(25),
        heartbeat_interval: Duration::from_millis(150),
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        },
    }
}

fn spawn_supervisor(
    addr: SocketAddr,
    secret: &str,
    files: Vec<MonitoredFile>,
) -> (CancellationToken, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let supervisor = ConnectionSupervisor::new(test_config(addr, secret), files);
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        supervisor.run(token).await.unwrap();
    });
    (cancel, handle)
}

fn monitored(path: &Path, tail_lines: u64) -> Vec<MonitoredFile> {
    vec![MonitoredFile::new(
        path.to_path_buf(),
        encoding_rs::UTF_8,
        tail_lines,
    )]
}

fn append(path: &Path, bytes: &[u8]) {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
}

fn temp_log(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("app.log")
}

async fn wait_until(ms: u64, f: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(ms);
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn sends_configured_tail_then_streams_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_log(&dir);
    append(&path, b"x1\nx2\nx3\n");

    let collector = Collector::start(None).await;
    let (cancel, handle) = spawn_supervisor(collector.addr, SECRET, monitored(&path, 2));

    assert!(wait_until(3000, || collector.line_count() >= 2).await);
    assert_eq!(collector.texts(), vec!["x2", "x3"]);
    let lines = collector.lines();
    assert_eq!(lines[0].1, 0);
    assert_eq!(lines[1].1, 1);

    append(&path, b"x4\n");
    assert!(wait_until(3000, || collector.line_count() >= 3).await);
    let lines = collector.lines();
    assert_eq!(lines[2].2, "x4");
    assert_eq!(lines[2].1, 2);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn appended_lines_arrive_exactly_once_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_log(&dir);
    append(&path, b"");

    let collector = Collector::start(None).await;
    let (cancel, handle) = spawn_supervisor(collector.addr, SECRET, monitored(&path, 50));

    assert!(wait_until(3000, || collector.accepted() >= 1).await);

    append(&path, b"a\nb\n");
    append(&path, b"c\n");
    assert!(wait_until(3000, || collector.line_count() >= 3).await);
    // Give a few extra polls a chance to produce (incorrect) duplicates.
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(collector.texts(), vec!["a", "b", "c"]);
    let seqs: Vec<u64> = collector.lines().iter().map(|l| l.1).collect();
    assert_eq!(seqs, vec![0, 1, 2]);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn multiple_files_each_keep_their_own_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.log");
    let b = dir.path().join("b.log");
    append(&a, b"");
    append(&b, b"");

    let collector = Collector::start(None).await;
    let files = vec![
        MonitoredFile::new(a.clone(), encoding_rs::UTF_8, 50),
        MonitoredFile::new(b.clone(), encoding_rs::UTF_8, 50),
    ];
    let (cancel, handle) = spawn_supervisor(collector.addr, SECRET, files);
    assert!(wait_until(3000, || collector.accepted() >= 1).await);

    append(&a, b"a1\n");
    append(&b, b"b1\n");
    append(&a, b"a2\n");
    assert!(wait_until(3000, || collector.line_count() >= 3).await);

    let lines = collector.lines();
    let a_name = a.display().to_string();
    let a_lines: Vec<_> = lines.iter().filter(|l| l.0 == a_name).collect();
    let b_lines: Vec<_> = lines.iter().filter(|l| l.0 != a_name).collect();

    // Interleaving between files is unspecified; order within each is not.
    assert_eq!(
        a_lines.iter().map(|l| l.2.as_str()).collect::<Vec<_>>(),
        vec!["a1", "a2"]
    );
    assert_eq!(
        a_lines.iter().map(|l| l.1).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(
        b_lines.iter().map(|l| l.2.as_str()).collect::<Vec<_>>(),
        vec!["b1"]
    );
    assert_eq!(b_lines[0].1, 0);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn truncation_emits_only_the_new_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_log(&dir);
    append(&path, b"a rather long original line of content\n");

    let collector = Collector::start(None).await;
    let (cancel, handle) = spawn_supervisor(collector.addr, SECRET, monitored(&path, 50));

    assert!(wait_until(3000, || collector.line_count() >= 1).await);

    // Truncate in place, then write something shorter.
    std::fs::write(&path, b"new\n").unwrap();
    assert!(wait_until(3000, || collector.line_count() >= 2).await);
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        collector.texts(),
        vec!["a rather long original line of content", "new"]
    );

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn rotation_restarts_at_the_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_log(&dir);
    append(&path, b"pre-rotation\n");

    let collector = Collector::start(None).await;
    let (cancel, handle) = spawn_supervisor(collector.addr, SECRET, monitored(&path, 50));

    assert!(wait_until(3000, || collector.line_count() >= 1).await);

    std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
    append(&path, b"post-rotation\n");

    assert!(wait_until(3000, || collector.line_count() >= 2).await);
    assert_eq!(collector.texts(), vec!["pre-rotation", "post-rotation"]);
    // Sequence keeps increasing across the rotation.
    let seqs: Vec<u64> = collector.lines().iter().map(|l| l.1).collect();
    assert_eq!(seqs, vec![0, 1]);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn resumes_after_connection_loss_without_losing_or_duplicating() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_log(&dir);
    append(&path, b"");

    // The collector kills the first serving connection after two lines.
    let collector = Collector::start(Some(2)).await;
    let (cancel, handle) = spawn_supervisor(collector.addr, SECRET, monitored(&path, 50));

    assert!(wait_until(3000, || collector.accepted() >= 1).await);

    append(&path, b"L1\nL2\n");
    assert!(wait_until(3000, || collector.line_count() >= 2).await);

    // The connection is now dead; the agent must reconnect on its own.
    assert!(wait_until(3000, || collector.accepted() >= 2).await);

    append(&path, b"L3\n");
    assert!(wait_until(3000, || collector.line_count() >= 3).await);
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Committed lines are not re-sent, later appends are not lost.
    assert_eq!(collector.texts(), vec!["L1", "L2", "L3"]);
    let seqs: Vec<u64> = collector.lines().iter().map(|l| l.1).collect();
    assert_eq!(seqs, vec![0, 1, 2]);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn wrong_secret_is_rejected_and_not_retried_tightly() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_log(&dir);
    append(&path, b"never delivered\n");

    let collector = Collector::start(None).await;
    let (cancel, handle) = spawn_supervisor(collector.addr, "wrong-secret", monitored(&path, 50));

    assert!(wait_until(2000, || collector.hellos() >= 1).await);
    // Rejection escalates the backoff to its 500ms ceiling; a tight loop
    // would pile up dozens of attempts in this window.
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(collector.accepted(), 0);
    assert!(collector.lines().is_empty());
    assert!(collector.hellos() <= 2, "hellos = {}", collector.hellos());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn heartbeats_flow_on_an_idle_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_log(&dir);
    append(&path, b"");

    let collector = Collector::start(None).await;
    let (cancel, handle) = spawn_supervisor(collector.addr, SECRET, monitored(&path, 50));

    assert!(wait_until(3000, || collector.accepted() >= 1).await);
    assert!(wait_until(2000, || collector.heartbeats() >= 2).await);
    assert!(collector.lines().is_empty());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_is_prompt_even_while_backing_off() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_log(&dir);
    append(&path, b"x\n");

    // Nothing is listening on this address: the agent sits in backoff.
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = unused.local_addr().unwrap();
    drop(unused);

    let (cancel, handle) = spawn_supervisor(addr, SECRET, monitored(&path, 50));
    tokio::time::sleep(Duration::from_millis(150)).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("supervisor did not stop promptly")
        .unwrap();
}
