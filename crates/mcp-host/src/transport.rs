//! MCP transport layer.
//!
//! Each session communicates over one transport:
//! - **Stdio**: spawn a child process, newline-delimited JSON-RPC over
//!   stdin/stdout. A background reader task correlates responses to pending
//!   requests by id, so responses may arrive out of order.
//! - **HttpStream**: POST JSON-RPC frames to an endpoint and read the
//!   (possibly chunked) response body.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use maestro_domain::cancel::CancelToken;
use maestro_domain::config::{SessionSpec, TransportKind};
use maestro_domain::error::Error;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Maximum number of non-JSON lines to tolerate before declaring the
/// server broken (a misconfigured server logging to stdout).
const MAX_SKIP_LINES: usize = 1000;

/// How long `close()` lets in-flight requests drain before tearing down.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for a child process to exit after stdin closes.
const KILL_AFTER: Duration = Duration::from_secs(5);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait + errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One bidirectional MCP session.
///
/// Implementations must correlate responses by request id and tolerate
/// out-of-order arrival. `close()` is idempotent; a request issued after
/// close has been observed fails with [`TransportError::Closed`].
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and await the matching response frame.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelToken,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str) -> Result<(), TransportError>;

    /// Whether the transport can still carry requests.
    fn is_open(&self) -> bool;

    /// Tear the session down. Idempotent; drains in-flight requests up to
    /// a short grace window, then terminates forcibly.
    async fn close(&self);
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transport closed")]
    Closed,

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable(msg) => Error::TransportUnavailable(msg),
            TransportError::Closed => Error::TransportClosed,
            TransportError::Protocol(msg) => Error::Protocol(msg),
            TransportError::Timeout(msg) => Error::Timeout(msg),
            TransportError::Cancelled => Error::Cancelled,
            TransportError::Io(e) => Error::Io(e),
            TransportError::Json(e) => Error::Json(e),
        }
    }
}

/// Open the transport described by a session spec.
pub fn open_transport(spec: &SessionSpec) -> Result<Box<dyn McpTransport>, TransportError> {
    match spec.transport {
        TransportKind::Stdio => Ok(Box::new(StdioTransport::spawn(spec)?)),
        TransportKind::HttpStream => Ok(Box::new(HttpStreamTransport::connect(spec)?)),
    }
}

/// Parse one line as a response frame.
///
/// Returns `None` for anything that is not a response: server-side
/// notifications, server-to-client requests (they carry an id but no
/// `result`/`error`), and malformed lines.
fn parse_response_frame(line: &str) -> Option<JsonRpcResponse> {
    if line.is_empty() || !line.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let is_response =
        value.get("id").is_some() && (value.get("result").is_some() || value.get("error").is_some());
    if !is_response {
        return None;
    }
    serde_json::from_value(value).ok()
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stdio transport: a child process speaking newline-delimited JSON-RPC.
///
/// Writes are FIFO under the stdin lock; a background reader dispatches
/// responses to waiting callers by id, so concurrent requests never block
/// each other on the read side.
#[derive(Debug)]
pub struct StdioTransport {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pid: Option<u32>,
    pending: PendingMap,
    reader: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    open: Arc<AtomicBool>,
    closing: AtomicBool,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn the child process described by the spec.
    pub fn spawn(spec: &SessionSpec) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::Unavailable(format!("failed to spawn '{}': {e}", spec.command))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Unavailable("failed to capture child stdin".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Unavailable("failed to capture child stdout".into())
        })?;

        let pid = child.id();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            BufReader::new(stdout),
            pending.clone(),
            open.clone(),
        ));

        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pid,
            pending,
            reader: Mutex::new(Some(reader)),
            next_id: AtomicU64::new(1),
            open,
            closing: AtomicBool::new(false),
            request_timeout: Duration::from_millis(spec.request_timeout_ms),
        })
    }

    /// OS process id of the child, if it is still tracked.
    pub fn process_id(&self) -> Option<u32> {
        self.pid
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        let mut stdin = self.stdin.lock().await;
        let write = async {
            stdin.write_all(json.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write.await.map_err(|e| {
            self.open.store(false, Ordering::SeqCst);
            TransportError::Io(e)
        })
    }
}

/// Background reader: dispatch response frames to pending requests by id.
///
/// Non-JSON lines (e.g. a server logging to stdout) are skipped up to
/// [`MAX_SKIP_LINES`]; server notifications are skipped silently. On EOF or
/// read error the transport is marked closed and all pending requests fail.
async fn read_loop(mut stdout: BufReader<ChildStdout>, pending: PendingMap, open: Arc<AtomicBool>) {
    let mut skipped = 0usize;
    loop {
        let mut line = String::new();
        match stdout.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "MCP stdout read error");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with('{') {
            skipped += 1;
            tracing::debug!(line = %trimmed, "skipping non-JSON line from MCP server stdout");
            if skipped >= MAX_SKIP_LINES {
                tracing::warn!("MCP server produced too many non-JSON lines, closing transport");
                break;
            }
            continue;
        }
        match parse_response_frame(trimmed) {
            Some(resp) => {
                let sender = pending.lock().remove(&resp.id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => tracing::debug!(id = resp.id, "response for unknown request id"),
                }
            }
            None => tracing::debug!(line = %trimmed, "skipping non-response frame from MCP server"),
        }
    }
    open.store(false, Ordering::SeqCst);
    // Dropping the senders fails every waiting request with Closed.
    pending.lock().clear();
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelToken,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        tracing::debug!(id, method, "sending MCP request");
        if let Err(e) = self.write_line(&json).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                self.pending.lock().remove(&id);
                Err(TransportError::Cancelled)
            }
            res = tokio::time::timeout(self.request_timeout, rx) => match res {
                Ok(Ok(resp)) => Ok(resp),
                Ok(Err(_)) => Err(TransportError::Closed),
                Err(_) => {
                    self.pending.lock().remove(&id);
                    Err(TransportError::Timeout(format!(
                        "no response to '{method}' within {:?}",
                        self.request_timeout
                    )))
                }
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let notif = JsonRpcNotification::new(method);
        let json = serde_json::to_string(&notif)?;
        tracing::debug!(method, "sending MCP notification");
        self.write_line(&json).await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        // Let in-flight requests drain within the grace window.
        let deadline = tokio::time::Instant::now() + CLOSE_GRACE;
        while !self.pending.lock().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.open.store(false, Ordering::SeqCst);

        // Closing stdin signals the server to exit.
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing MCP server stdin");
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(KILL_AFTER, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "MCP server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for MCP server process");
            }
            Err(_) => {
                tracing::warn!("MCP server process did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill MCP server process");
                }
            }
        }

        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.pending.lock().clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP-stream transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP-stream transport: each JSON-RPC frame is POSTed to the endpoint;
/// the response body carries one or more newline-delimited frames (servers
/// may interleave notifications before the actual response).
#[derive(Debug)]
pub struct HttpStreamTransport {
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicU64,
    closing: AtomicBool,
    shutdown: CancelToken,
    request_timeout: Duration,
}

impl HttpStreamTransport {
    pub fn connect(spec: &SessionSpec) -> Result<Self, TransportError> {
        let endpoint = spec.endpoint.clone().ok_or_else(|| {
            TransportError::Unavailable(format!("session '{}' has no endpoint", spec.id))
        })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            endpoint,
            client,
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            shutdown: CancelToken::new(),
            request_timeout: Duration::from_millis(spec.request_timeout_ms),
        })
    }

    async fn post_frame<T: serde::Serialize>(
        &self,
        frame: &T,
    ) -> Result<reqwest::Response, TransportError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(frame)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Protocol(format!(
                "endpoint returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }
}

fn from_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_connect() {
        TransportError::Unavailable(e.to_string())
    } else if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Protocol(e.to_string())
    }
}

#[async_trait]
impl McpTransport for HttpStreamTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancelToken,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        tracing::debug!(id, method, endpoint = %self.endpoint, "sending MCP request");

        let exchange = async {
            let mut resp = self.post_frame(&req).await?;
            let mut buf = String::new();
            while let Some(chunk) = resp.chunk().await.map_err(from_reqwest)? {
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    if let Some(frame) = parse_response_frame(line.trim()) {
                        if frame.id == id {
                            return Ok(frame);
                        }
                        tracing::debug!(got = frame.id, expected = id, "frame for other request");
                    }
                }
            }
            // Single JSON object body without a trailing newline.
            if let Some(frame) = parse_response_frame(buf.trim()) {
                if frame.id == id {
                    return Ok(frame);
                }
            }
            Err(TransportError::Protocol(format!(
                "no response frame for '{method}'"
            )))
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            _ = self.shutdown.cancelled() => Err(TransportError::Closed),
            res = tokio::time::timeout(self.request_timeout, exchange) => match res {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout(format!(
                    "no response to '{method}' within {:?}",
                    self.request_timeout
                ))),
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let notif = JsonRpcNotification::new(method);
        self.post_frame(&notif).await.map(|_| ())
    }

    fn is_open(&self) -> bool {
        !self.closing.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        // Outstanding requests are cancelled, not drained: there is no
        // shared connection state to hand back.
        self.shutdown.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
