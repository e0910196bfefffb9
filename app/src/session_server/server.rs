//! TCP server for the command bridge.
//!
//! Binds to 127.0.0.1:<port> and handles JSONL messages. Each connection gets
//! its own thread; every request is forwarded to the host thread over the
//! bridge and the reply written back on the same line order.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tidemark_config::Settings;
use tidemark_protocol::{ErrorBody, ErrorCode, Request, Response};

use super::bridge::{BridgeError, SessionBridgeHandle};
use super::error::CommandError;
use super::framing::{self, LineRead};
use super::target::{ConnectionId, SessionTargets};

/// Maximum consecutive parse failures before disconnecting a client.
pub const MAX_PARSE_FAILURES: u32 = 3;

/// Configuration for the command bridge server.
#[derive(Clone)]
pub struct SessionServerConfig {
    /// Port to bind on localhost. 0 picks a free port.
    pub port: u16,
    pub max_connections: usize,
    /// Longest accepted request line, in bytes.
    pub max_message_bytes: usize,
    /// How long a connection waits for the host thread per request.
    pub command_timeout: Duration,
    /// Bridge handle for workbench communication.
    pub bridge: SessionBridgeHandle,
    /// Shared with the workbench so closed plots drop out of connection caches.
    pub targets: SessionTargets,
}

impl SessionServerConfig {
    pub fn new(bridge: SessionBridgeHandle, targets: SessionTargets) -> Self {
        Self::from_settings(&Settings::default(), bridge, targets)
    }

    pub fn from_settings(settings: &Settings, bridge: SessionBridgeHandle, targets: SessionTargets) -> Self {
        Self {
            port: settings.bridge_port,
            max_connections: settings.max_connections,
            max_message_bytes: settings.max_message_bytes,
            command_timeout: settings.command_timeout(),
            bridge,
            targets,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl std::fmt::Debug for SessionServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionServerConfig")
            .field("port", &self.port)
            .field("max_connections", &self.max_connections)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

/// Operational metrics for the bridge.
#[derive(Clone, Default)]
pub struct ServerMetrics {
    /// Connections closed due to parse failure limit.
    pub connections_closed_parse_failures: Arc<AtomicU64>,
    /// Connections closed due to oversized message.
    pub connections_closed_oversize: Arc<AtomicU64>,
    /// Connections refused due to connection limit.
    pub connections_refused_limit: Arc<AtomicU64>,
    /// Requests whose reply did not arrive within the command timeout.
    pub command_timeouts: Arc<AtomicU64>,
    /// Requests answered (successfully or not).
    pub requests_handled: Arc<AtomicU64>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// State shared by the listener and every connection thread.
#[derive(Clone)]
struct Shared {
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    next_conn_id: Arc<AtomicU64>,
    metrics: ServerMetrics,
}

/// Decrements the live connection count and drops the connection's cached
/// target when the connection thread exits, however it exits.
struct ConnectionGuard {
    conn_id: ConnectionId,
    active: Arc<AtomicUsize>,
    targets: SessionTargets,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.targets.clear(self.conn_id);
        self.active.fetch_sub(1, Ordering::SeqCst);
        log::debug!("Connection {} closed", self.conn_id);
    }
}

/// The command bridge server: TCP listener plus client connections.
pub struct SessionServer {
    listener_handle: Option<JoinHandle<()>>,
    bound_addr: Option<SocketAddr>,
    shared: Shared,
}

impl SessionServer {
    /// Create a new server (not started).
    pub fn new() -> Self {
        Self {
            listener_handle: None,
            bound_addr: None,
            shared: Shared {
                shutdown: Arc::new(AtomicBool::new(false)),
                active: Arc::new(AtomicUsize::new(0)),
                next_conn_id: Arc::new(AtomicU64::new(1)),
                metrics: ServerMetrics::new(),
            },
        }
    }

    /// Bind and start accepting connections. A second call while running is
    /// a no-op.
    pub fn start(&mut self, config: SessionServerConfig) -> std::io::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);

        let listener = TcpListener::bind(("127.0.0.1", config.port))?;
        let addr = listener.local_addr()?;
        self.bound_addr = Some(addr);

        // Set non-blocking so we can check shutdown flag
        listener.set_nonblocking(true)?;

        let shared = self.shared.clone();
        self.listener_handle = Some(thread::spawn(move || {
            run_listener(listener, config, shared);
        }));

        log::info!("Command bridge listening on {}", addr);
        Ok(())
    }

    /// Stop accepting connections and wind down existing ones.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener_handle.take() {
            let _ = handle.join();
        }
        self.bound_addr = None;
        log::info!("Command bridge stopped");
    }

    pub fn is_running(&self) -> bool {
        self.listener_handle.is_some() && !self.shared.shutdown.load(Ordering::SeqCst)
    }

    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    /// Number of connected clients.
    pub fn connection_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.shared.metrics
    }
}

impl Default for SessionServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the listener loop in a separate thread.
fn run_listener(listener: TcpListener, config: SessionServerConfig, shared: Shared) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                // Check connection limit before spawning handler
                if shared.active.load(Ordering::SeqCst) >= config.max_connections {
                    log::warn!(
                        "Connection refused from {}: limit of {} reached",
                        addr,
                        config.max_connections
                    );
                    shared.metrics.connections_refused_limit.fetch_add(1, Ordering::Relaxed);
                    drop(stream);
                    continue;
                }

                let conn_id = shared.next_conn_id.fetch_add(1, Ordering::SeqCst);
                shared.active.fetch_add(1, Ordering::SeqCst);
                log::debug!("Accepted connection {} from {}", conn_id, addr);

                let config = config.clone();
                let shared = shared.clone();
                thread::spawn(move || {
                    let _guard = ConnectionGuard {
                        conn_id,
                        active: Arc::clone(&shared.active),
                        targets: config.targets.clone(),
                    };
                    if let Err(e) = handle_connection(stream, conn_id, &config, &shared) {
                        log::warn!("Connection error from {}: {}", addr, e);
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // No connection ready, sleep briefly
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
                break;
            }
        }
    }
}

/// Handle a single client connection.
fn handle_connection(
    mut stream: TcpStream,
    conn_id: ConnectionId,
    config: &SessionServerConfig,
    shared: &Shared,
) -> std::io::Result<()> {
    // Short read timeout so the shutdown flag is noticed
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(100)))?;
    stream.set_write_timeout(Some(Duration::from_secs(10)))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut buf = Vec::new();
    let mut parse_failures: u32 = 0;

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        let line = match framing::read_line(&mut reader, &mut buf, config.max_message_bytes)? {
            LineRead::Line(line) => line,
            LineRead::Pending => continue,
            LineRead::Closed => return Ok(()),
            LineRead::TooLarge => {
                send_error(&mut stream, None, ErrorBody::new(ErrorCode::MessageTooLarge, ErrorCode::MessageTooLarge.message()))?;
                log::warn!("Connection {} sent oversized message, disconnecting", conn_id);
                shared.metrics.connections_closed_oversize.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        // Parse as plain JSON first so a malformed request still has its id echoed
        let value: Value = match serde_json::from_slice(&line) {
            Ok(v) => {
                // Reset parse failure counter on successful parse
                parse_failures = 0;
                v
            }
            Err(e) => {
                parse_failures += 1;
                log::debug!("Malformed message ({}/{}): {}", parse_failures, MAX_PARSE_FAILURES, e);
                send_error(&mut stream, None, CommandError::InvalidRequest(format!("malformed JSON: {}", e)).to_error_body())?;

                // Disconnect after too many consecutive parse failures
                if parse_failures >= MAX_PARSE_FAILURES {
                    log::warn!("Connection {} exceeded parse failure limit, disconnecting", conn_id);
                    shared.metrics.connections_closed_parse_failures.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                continue;
            }
        };

        let id = value.get("id").cloned();
        let request: Request = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                send_error(&mut stream, id, CommandError::InvalidRequest(format!("invalid request: {}", e)).to_error_body())?;
                continue;
            }
        };

        let response = forward(conn_id, request, config, shared);
        shared.metrics.requests_handled.fetch_add(1, Ordering::Relaxed);
        send_message(&mut stream, &response)?;
    }
}

/// Hand a request to the host thread and wait for its reply.
fn forward(conn_id: ConnectionId, request: Request, config: &SessionServerConfig, shared: &Shared) -> Response {
    let id = request.id.clone();
    let command = request.command.clone();
    match config.bridge.execute(conn_id, request, config.command_timeout) {
        Ok(response) => response,
        Err(BridgeError::Timeout) => {
            log::warn!("Command '{}' from connection {} timed out", command, conn_id);
            shared.metrics.command_timeouts.fetch_add(1, Ordering::Relaxed);
            Response::failure(id, CommandError::Timeout.to_error_body())
        }
        Err(BridgeError::ChannelClosed) => Response::failure(id, CommandError::Unavailable.to_error_body()),
    }
}

/// Send a message to the client.
fn send_message(stream: &mut TcpStream, msg: &Response) -> std::io::Result<()> {
    let json = serde_json::to_string(msg).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(stream, "{}", json)?;
    stream.flush()
}

/// Send an error message to the client.
fn send_error(stream: &mut TcpStream, id: Option<Value>, error: ErrorBody) -> std::io::Result<()> {
    send_message(stream, &Response::failure(id, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_server::bridge::SessionRequest;
    use serde_json::json;
    use std::io::BufRead;
    use std::sync::mpsc;
    use tidemark_core::EditorId;

    /// Echo bridge: replies with the command name and connection id.
    fn create_test_bridge() -> (SessionBridgeHandle, thread::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<SessionRequest>();
        let handle = SessionBridgeHandle::new(tx);
        let handler = thread::spawn(move || {
            while let Ok(SessionRequest::Execute { conn_id, request, reply }) = rx.recv() {
                if request.command == "slow" {
                    thread::sleep(Duration::from_millis(300));
                }
                let _ = reply.send(Response::success(
                    request.id,
                    json!({"command": request.command, "conn": conn_id}),
                ));
            }
        });
        (handle, handler)
    }

    fn start_server(max_connections: usize) -> (SessionServer, SessionTargets) {
        let (bridge, _handler) = create_test_bridge();
        let targets = SessionTargets::new();
        let mut config = SessionServerConfig::new(bridge, targets.clone()).with_port(0);
        config.max_connections = max_connections;
        config.max_message_bytes = 1024;
        config.command_timeout = Duration::from_millis(100);
        let mut server = SessionServer::new();
        server.start(config).unwrap();
        (server, targets)
    }

    fn connect(server: &SessionServer) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(server.bound_addr().unwrap()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        (stream, reader)
    }

    fn read_response(reader: &mut BufReader<TcpStream>) -> Response {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn test_server_lifecycle() {
        let (mut server, _) = start_server(5);
        assert!(server.is_running());
        assert!(server.bound_addr().is_some());

        server.stop();
        assert!(!server.is_running());
        assert!(server.bound_addr().is_none());
    }

    #[test]
    fn test_request_round_trip() {
        let (mut server, _) = start_server(5);
        let (mut stream, mut reader) = connect(&server);

        writeln!(stream, "{}", json!({"command": "get_time", "id": 1})).unwrap();
        let resp = read_response(&mut reader);
        assert_eq!(resp.id, Some(json!(1)));
        assert_eq!(resp.result.unwrap()["command"], "get_time");

        server.stop();
    }

    #[test]
    fn test_framing_parse_failures_disconnect() {
        let (mut server, _) = start_server(5);
        let (mut stream, mut reader) = connect(&server);

        for _ in 0..MAX_PARSE_FAILURES {
            writeln!(stream, "not json").unwrap();
            let resp = read_response(&mut reader);
            assert_eq!(resp.error.unwrap().code, "invalid_request");
        }

        // Server hangs up
        let mut line = String::new();
        let n = reader.read_line(&mut line).unwrap_or(0);
        assert_eq!(n, 0);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.metrics().connections_closed_parse_failures.load(Ordering::Relaxed), 1);
        server.stop();
    }

    #[test]
    fn test_valid_json_resets_parse_failures() {
        let (mut server, _) = start_server(5);
        let (mut stream, mut reader) = connect(&server);

        for round in 0..2 {
            for _ in 0..MAX_PARSE_FAILURES - 1 {
                writeln!(stream, "{{broken").unwrap();
                assert!(read_response(&mut reader).is_error());
            }
            writeln!(stream, "{}", json!({"command": "get_time", "id": round})).unwrap();
            assert!(!read_response(&mut reader).is_error());
        }
        server.stop();
    }

    #[test]
    fn test_invalid_shape_echoes_id() {
        let (mut server, _) = start_server(5);
        let (mut stream, mut reader) = connect(&server);

        writeln!(stream, "{}", json!({"id": "x1", "params": {}})).unwrap();
        let resp = read_response(&mut reader);
        assert_eq!(resp.id, Some(json!("x1")));
        assert_eq!(resp.error.unwrap().code, "invalid_request");
        server.stop();
    }

    #[test]
    fn test_oversized_message_disconnects() {
        let (mut server, _) = start_server(5);
        let (mut stream, mut reader) = connect(&server);

        let big = format!("{{\"command\":\"{}\"}}", "x".repeat(2048));
        writeln!(stream, "{}", big).unwrap();
        let resp = read_response(&mut reader);
        assert_eq!(resp.error.unwrap().code, "message_too_large");

        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.metrics().connections_closed_oversize.load(Ordering::Relaxed), 1);
        server.stop();
    }

    #[test]
    fn test_slow_host_times_out() {
        let (mut server, _) = start_server(5);
        let (mut stream, mut reader) = connect(&server);

        writeln!(stream, "{}", json!({"command": "slow", "id": 5})).unwrap();
        let resp = read_response(&mut reader);
        assert_eq!(resp.id, Some(json!(5)));
        assert_eq!(resp.error.unwrap().code, "timeout");
        assert_eq!(server.metrics().command_timeouts.load(Ordering::Relaxed), 1);
        server.stop();
    }

    #[test]
    fn test_connection_limit_enforced() {
        let (mut server, _) = start_server(2);
        let mut streams = Vec::new();
        for i in 0..2 {
            let (mut stream, mut reader) = connect(&server);
            writeln!(stream, "{}", json!({"command": "get_time", "id": i})).unwrap();
            assert!(!read_response(&mut reader).is_error());
            streams.push((stream, reader));
        }
        assert_eq!(server.connection_count(), 2);

        let (_stream, mut reader) = connect(&server);
        reader.get_ref().set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut line = String::new();
        let read = reader.read_line(&mut line);
        assert!(read.is_err() || line.is_empty(), "third connection should be refused");

        thread::sleep(Duration::from_millis(100));
        assert_eq!(server.metrics().connections_refused_limit.load(Ordering::Relaxed), 1);
        server.stop();
    }

    #[test]
    fn test_disconnect_clears_cached_target() {
        let (mut server, targets) = start_server(5);
        let (mut stream, mut reader) = connect(&server);

        writeln!(stream, "{}", json!({"command": "get_time"})).unwrap();
        let resp = read_response(&mut reader);
        let conn = resp.result.unwrap()["conn"].as_u64().unwrap();
        targets.set(conn, EditorId::generate());

        drop(reader);
        drop(stream);
        thread::sleep(Duration::from_millis(300));
        assert_eq!(targets.get(conn), None);
        assert_eq!(server.connection_count(), 0);
        server.stop();
    }
}
