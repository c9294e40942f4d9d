//! Shared integration-test harness: spawns the `coilmq` binary on an
//! ephemeral port and talks STOMP to it over TCP.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coilmq_core::frame::header;
use coilmq_core::{Command as StompCommand, StompCodec, StompFrame};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio_util::codec::Framed;

/// Default timeout for a single frame or startup step.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running broker process.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
pub struct BrokerProcess {
    child: Child,
    port: u16,
    stderr: Arc<Mutex<String>>,
}

#[allow(clippy::missing_panics_doc)]
impl BrokerProcess {
    /// Starts `coilmq run --listen 127.0.0.1:0` plus `extra` arguments and
    /// waits for the "listening" log line to learn the port.
    pub async fn start(extra: &[&str]) -> Self {
        let bin = env!("CARGO_BIN_EXE_coilmq");
        let mut child = Command::new(bin)
            .args(["-v", "--color", "never", "run", "--listen", "127.0.0.1:0"])
            .args(extra)
            .env_remove("COILMQ_CONFIG")
            .env_remove("COILMQ_LOG_LEVEL")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn coilmq");

        let stderr = child.stderr.take().expect("stderr not captured");
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        let mut captured = String::new();
        let port = loop {
            line.clear();
            let n = tokio::time::timeout(DEFAULT_TIMEOUT, reader.read_line(&mut line))
                .await
                .expect("timed out waiting for broker startup")
                .expect("failed to read stderr");
            assert!(n > 0, "broker exited before listening:\n{captured}");
            captured.push_str(&line);
            if line.contains("listening")
                && let Some(port) = parse_port(&line)
            {
                break port;
            }
        };

        // Keep draining stderr so the broker never blocks on a full pipe.
        let log = Arc::new(Mutex::new(captured));
        let sink = Arc::clone(&log);
        tokio::spawn(async move {
            let mut line = String::new();
            while reader.read_line(&mut line).await.is_ok_and(|n| n > 0) {
                sink.lock().unwrap().push_str(&line);
                line.clear();
            }
        });

        Self {
            child,
            port,
            stderr: log,
        }
    }

    /// Bound port.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Everything the broker has written to stderr so far.
    pub fn stderr(&self) -> String {
        self.stderr.lock().unwrap().clone()
    }

    /// Opens a raw STOMP connection (no CONNECT sent).
    pub async fn client(&self) -> StompClient {
        let stream = TcpStream::connect(("127.0.0.1", self.port))
            .await
            .expect("failed to connect to broker");
        StompClient::from_stream(stream)
    }

    /// Opens a connection and completes the CONNECT handshake.
    pub async fn connected_client(&self) -> StompClient {
        let mut client = self.client().await;
        let reply = client
            .request(StompFrame::new(StompCommand::Connect))
            .await;
        assert_eq!(reply.command, StompCommand::Connected, "{reply:?}");
        client
    }

    /// Sends SIGTERM and waits for the process to exit.
    pub async fn terminate(mut self) -> std::process::ExitStatus {
        let pid = self.child.id().expect("broker already exited");
        let status = std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status()
            .expect("failed to run kill");
        assert!(status.success());
        tokio::time::timeout(Duration::from_secs(10), self.child.wait())
            .await
            .expect("broker did not exit after SIGTERM")
            .expect("failed to wait for broker")
    }

    /// Runs the binary to completion with the given arguments.
    pub fn run_command(args: &[&str]) -> Output {
        std::process::Command::new(env!("CARGO_BIN_EXE_coilmq"))
            .args(args)
            .env_remove("COILMQ_CONFIG")
            .output()
            .expect("failed to run coilmq")
    }

    /// Returns the path to a test fixture.
    pub fn fixture_path(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }
}

/// Extracts the port from a log line containing `127.0.0.1:<port>`.
fn parse_port(line: &str) -> Option<u16> {
    let start = line.find("127.0.0.1:")? + "127.0.0.1:".len();
    line[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()
}

/// A STOMP client over TCP.
pub struct StompClient {
    framed: Framed<TcpStream, StompCodec>,
}

#[allow(clippy::missing_panics_doc)]
impl StompClient {
    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, StompCodec::default()),
        }
    }

    /// Sends a frame.
    pub async fn send(&mut self, frame: StompFrame) {
        self.framed.send(frame).await.expect("failed to send frame");
    }

    /// Waits for the next frame from the broker.
    pub async fn recv(&mut self) -> StompFrame {
        tokio::time::timeout(DEFAULT_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("failed to decode frame")
    }

    /// Returns the next frame, or `None` if nothing arrives within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<StompFrame> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            _ => None,
        }
    }

    /// Sends a frame and waits for the reply.
    pub async fn request(&mut self, frame: StompFrame) -> StompFrame {
        self.send(frame).await;
        self.recv().await
    }

    /// Subscribes and waits for the broker to confirm with a receipt.
    pub async fn subscribe(&mut self, destination: &str, ack: Option<&str>) {
        let mut frame = StompFrame::new(StompCommand::Subscribe)
            .with_header(header::DESTINATION, destination)
            .with_header(header::RECEIPT, format!("sub-{destination}"));
        if let Some(ack) = ack {
            frame = frame.with_header(header::ACK, ack);
        }
        let reply = self.request(frame).await;
        assert_eq!(reply.command, StompCommand::Receipt, "{reply:?}");
    }

    /// Publishes a body and waits for the receipt so ordering is settled.
    pub async fn publish(&mut self, destination: &str, body: &str) {
        let reply = self
            .request(
                StompFrame::new(StompCommand::Send)
                    .with_header(header::DESTINATION, destination)
                    .with_header(header::RECEIPT, "pub")
                    .with_body(body.to_string()),
            )
            .await;
        assert_eq!(reply.command, StompCommand::Receipt, "{reply:?}");
    }

    /// Returns `true` once the broker has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(DEFAULT_TIMEOUT, self.framed.next()).await,
            Ok(None | Some(Err(_)))
        )
    }
}
