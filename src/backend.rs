//! Channel to the tool-execution backend.
//!
//! [`ToolBackend`] is the seam the dispatcher talks to. The production
//! implementation, [`ChildProcessBackend`], owns a long-lived child process
//! speaking line-delimited JSON-RPC 2.0 on its stdio. The child is spawned on
//! first use, pinged on an interval while idle, and re-spawned when it exits
//! or stops answering. A call moves to a fresh child only if its request
//! never reached the old one.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tool_server::rpc::{RpcErrorObject, RpcRequest, RpcResponse, JSONRPC_VERSION};

pub const DEFAULT_TOOL_SERVER_COMMAND: &str = "lrm-tool-server";
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(10);
const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("tool backend command is empty")]
    EmptyCommand,
    #[error("failed to start tool backend `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool backend connection closed")]
    Disconnected,
    #[error("tool backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tool backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("tool backend returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid tool backend message: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Whether the failure means the channel itself is unusable.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Io(_) | Self::Timeout(_))
    }
}

impl From<RpcErrorObject> for BackendError {
    fn from(error: RpcErrorObject) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// Request/response access to backend tools by backend tool name.
#[async_trait]
pub trait ToolBackend: Send + Sync + 'static {
    /// Invokes one tool and returns the backend-shaped result.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError>;

    /// Releases backend resources. Later calls may re-establish them.
    async fn shutdown(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildProcessConfig {
    pub program: String,
    pub args: Vec<String>,
    pub health_check_interval: Duration,
    /// Per-call deadline for `tools/call`. `None` waits for the tool to finish.
    pub call_timeout: Option<Duration>,
}

impl ChildProcessConfig {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            call_timeout: None,
        }
    }

    /// Splits a whitespace-separated command line into program and arguments.
    pub fn from_command_line(command_line: &str) -> Result<Self, BackendError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(BackendError::EmptyCommand)?;
        Ok(Self::new(program).with_args(parts.collect()))
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

impl Default for ChildProcessConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_SERVER_COMMAND)
    }
}

type Slot = Arc<AsyncMutex<Option<Arc<Connection>>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// Tool backend reached through a child process over stdio.
pub struct ChildProcessBackend {
    config: ChildProcessConfig,
    slot: Slot,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChildProcessBackend {
    /// Creates the backend without spawning anything yet.
    #[must_use]
    pub fn new(config: ChildProcessConfig) -> Self {
        Self {
            config,
            slot: Arc::new(AsyncMutex::new(None)),
            health_task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ChildProcessConfig {
        &self.config
    }

    /// Whether a live child is currently attached.
    pub async fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|connection| connection.is_alive())
    }

    async fn connection(&self) -> Result<Arc<Connection>, BackendError> {
        let connection = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(connection) if connection.is_alive() => Arc::clone(connection),
                _ => {
                    let connection = Connection::open(&self.config).await?;
                    *slot = Some(Arc::clone(&connection));
                    connection
                }
            }
        };
        self.ensure_health_task();
        Ok(connection)
    }

    async fn discard(&self, stale: &Arc<Connection>) {
        let removed = {
            let mut slot = self.slot.lock().await;
            if slot
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, stale))
            {
                slot.take()
            } else {
                None
            }
        };
        if let Some(connection) = removed {
            connection.kill().await;
        }
    }

    fn ensure_health_task(&self) {
        let mut task = lock_unpoisoned(&self.health_task);
        if task.is_some() {
            return;
        }
        let slot = Arc::clone(&self.slot);
        let config = self.config.clone();
        *task = Some(tokio::spawn(health_check_loop(slot, config)));
    }
}

#[async_trait]
impl ToolBackend for ChildProcessBackend {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BackendError> {
        let params = json!({ "name": name, "arguments": arguments });
        let connection = self.connection().await?;
        match connection
            .exchange("tools/call", params.clone(), self.config.call_timeout)
            .await
        {
            Ok(result) => Ok(result),
            // Nothing reached the child, so the call can go to a fresh one.
            Err(RequestError::Unsent(error)) => {
                tracing::warn!(tool = name, %error, "tool backend connection lost; reconnecting");
                self.discard(&connection).await;
                let connection = self.connection().await?;
                connection
                    .request("tools/call", params, self.config.call_timeout)
                    .await
            }
            // The child may have acted on it; never replay.
            Err(RequestError::Sent(error)) => Err(error),
        }
    }

    async fn shutdown(&self) {
        if let Some(task) = lock_unpoisoned(&self.health_task).take() {
            task.abort();
        }
        let connection = self.slot.lock().await.take();
        if let Some(connection) = connection {
            tracing::debug!("stopping tool backend");
            connection.kill().await;
        }
    }
}

impl Drop for ChildProcessBackend {
    fn drop(&mut self) {
        if let Some(task) = lock_unpoisoned(&self.health_task).take() {
            task.abort();
        }
    }
}

async fn health_check_loop(slot: Slot, config: ChildProcessConfig) {
    let ping_timeout = PING_TIMEOUT.min(config.health_check_interval);
    let mut interval = tokio::time::interval(config.health_check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;

        let current = slot.lock().await.clone();
        let Some(connection) = current else {
            continue;
        };
        if !check_health(&connection, ping_timeout).await {
            tracing::warn!(program = %config.program, "tool backend failed health check; restarting");
            replace_connection(&slot, &connection, &config).await;
        }
    }
}

/// A child that is working on a request is healthy; it answers serially and
/// a ping would only queue behind the call.
async fn check_health(connection: &Connection, ping_timeout: Duration) -> bool {
    if !connection.is_alive() {
        return false;
    }
    if connection.is_busy() {
        return true;
    }
    match connection.request("ping", json!({}), Some(ping_timeout)).await {
        Ok(_) => true,
        Err(_) if connection.is_alive() && connection.is_busy() => true,
        Err(error) => {
            tracing::debug!(%error, "tool backend ping failed");
            false
        }
    }
}

async fn replace_connection(slot: &Slot, stale: &Arc<Connection>, config: &ChildProcessConfig) {
    let removed = {
        let mut guard = slot.lock().await;
        if guard
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, stale))
        {
            guard.take()
        } else {
            None
        }
    };
    let Some(removed) = removed else {
        return;
    };
    removed.kill().await;

    let fresh = match Connection::open(config).await {
        Ok(fresh) => fresh,
        Err(error) => {
            tracing::warn!(%error, "tool backend restart failed; will retry on next call");
            return;
        }
    };
    let unused = {
        let mut guard = slot.lock().await;
        if guard.is_some() {
            Some(fresh)
        } else {
            *guard = Some(fresh);
            None
        }
    };
    // A caller reconnected first.
    if let Some(unused) = unused {
        unused.kill().await;
    }
}

/// Failure of one request, split by whether its line was written to the child.
#[derive(Debug)]
enum RequestError {
    Unsent(BackendError),
    Sent(BackendError),
}

impl From<RequestError> for BackendError {
    fn from(error: RequestError) -> Self {
        match error {
            RequestError::Unsent(error) | RequestError::Sent(error) => error,
        }
    }
}

struct Connection {
    child: AsyncMutex<Child>,
    stdin: AsyncMutex<ChildStdin>,
    pending: Pending,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl Connection {
    async fn open(config: &ChildProcessConfig) -> Result<Arc<Self>, BackendError> {
        tracing::info!(program = %config.program, args = ?config.args, "starting tool backend");
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Protocol("child stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Protocol("child stdout was not captured".to_string()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_responses(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));

        let connection = Arc::new(Self {
            child: AsyncMutex::new(child),
            stdin: AsyncMutex::new(stdin),
            pending,
            alive,
            next_id: AtomicU64::new(1),
            reader,
        });

        let initialize = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "lrm-relay", "version": env!("CARGO_PKG_VERSION") },
        });
        if let Err(error) = connection
            .request("initialize", initialize, Some(PING_TIMEOUT))
            .await
        {
            connection.kill().await;
            return Err(error);
        }
        connection
            .notify("notifications/initialized", json!({}))
            .await?;

        Ok(connection)
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_busy(&self) -> bool {
        !lock_unpoisoned(&self.pending).is_empty()
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BackendError> {
        Ok(self.exchange(method, params, timeout).await?)
    }

    async fn exchange(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RequestError> {
        if !self.is_alive() {
            return Err(RequestError::Unsent(BackendError::Disconnected));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        lock_unpoisoned(&self.pending).insert(id, sender);
        // The reader marks the channel dead before clearing pending senders.
        if !self.is_alive() {
            lock_unpoisoned(&self.pending).remove(&id);
            return Err(RequestError::Unsent(BackendError::Disconnected));
        }

        // A failed write may still have delivered part of the line.
        if let Err(error) = self.write(&RpcRequest::new(id, method, params)).await {
            lock_unpoisoned(&self.pending).remove(&id);
            self.alive.store(false, Ordering::SeqCst);
            return Err(RequestError::Sent(error));
        }

        let response = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    lock_unpoisoned(&self.pending).remove(&id);
                    return Err(RequestError::Sent(BackendError::Timeout(limit)));
                }
            },
            None => receiver.await,
        };

        let response = response.map_err(|_| RequestError::Sent(BackendError::Disconnected))?;
        response
            .into_result()
            .map_err(|error| RequestError::Sent(error.into()))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), BackendError> {
        self.write(&RpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params,
        })
        .await
    }

    async fn write(&self, request: &RpcRequest) -> Result<(), BackendError> {
        let mut line = serde_json::to_string(request)
            .map_err(|error| BackendError::Protocol(error.to_string()))?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
        lock_unpoisoned(&self.pending).clear();
        let mut child = self.child.lock().await;
        if let Err(error) = child.kill().await {
            tracing::debug!(%error, "tool backend already exited");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_responses(stdout: ChildStdout, pending: Pending, alive: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response: RpcResponse = match serde_json::from_str(&line) {
                    Ok(response) => response,
                    Err(error) => {
                        tracing::warn!(%error, "ignoring unparseable tool backend line");
                        continue;
                    }
                };
                let Some(id) = response.id.as_u64() else {
                    continue;
                };
                if let Some(sender) = lock_unpoisoned(&pending).remove(&id) {
                    let _ = sender.send(response);
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%error, "tool backend stdout failed");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a disconnect.
    lock_unpoisoned(&pending).clear();
    tracing::debug!("tool backend stdout closed");
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_splits_program_and_args() {
        let config = ChildProcessConfig::from_command_line("  lrm-tool-server --root /srv  ")
            .expect("non-empty command");
        assert_eq!(config.program, "lrm-tool-server");
        assert_eq!(config.args, vec!["--root".to_string(), "/srv".to_string()]);
        assert_eq!(config.health_check_interval, DEFAULT_HEALTH_CHECK_INTERVAL);

        assert!(matches!(
            ChildProcessConfig::from_command_line("   "),
            Err(BackendError::EmptyCommand)
        ));
    }

    #[test]
    fn connection_failures_are_classified() {
        assert!(BackendError::Disconnected.is_connection_failure());
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_connection_failure());
        assert!(!BackendError::Rpc {
            code: -32601,
            message: "nope".to_string(),
        }
        .is_connection_failure());
    }

    // `cat` echoes each request line back; an echoed request parses as a
    // response with the same id and no result.
    #[tokio::test]
    async fn echo_child_answers_calls_lazily() {
        let backend = ChildProcessBackend::new(ChildProcessConfig::new("cat"));
        assert!(!backend.is_connected().await);

        let result = backend
            .call_tool("read_file", json!({"file_path": "/tmp/x"}))
            .await
            .expect("echoed call should resolve");
        assert_eq!(result, Value::Null);
        assert!(backend.is_connected().await);

        backend.shutdown().await;
        assert!(!backend.is_connected().await);
    }

    #[tokio::test]
    async fn concurrent_calls_are_correlated() {
        let backend = Arc::new(ChildProcessBackend::new(ChildProcessConfig::new("cat")));
        let calls = (0..4).map(|index| {
            let backend = Arc::clone(&backend);
            async move { backend.call_tool("grep", json!({ "pattern": index })).await }
        });

        let results = futures_util::future::join_all(calls).await;
        assert!(results.iter().all(Result::is_ok), "{results:?}");
        backend.shutdown().await;
    }

    #[tokio::test]
    async fn missing_program_surfaces_spawn_error() {
        let backend = ChildProcessBackend::new(ChildProcessConfig::new(
            "lrm-relay-definitely-missing-binary",
        ));
        let error = backend
            .call_tool("bash", json!({"command": "true"}))
            .await
            .expect_err("spawn must fail");
        assert!(matches!(error, BackendError::Spawn { .. }), "{error}");
    }

    #[tokio::test]
    async fn child_that_exits_after_handshake_reports_disconnect() {
        // Answers `initialize`, swallows the notification, then exits.
        let backend = ChildProcessBackend::new(
            ChildProcessConfig::new("sh").with_args(vec![
                "-c".to_string(),
                "head -n 1; read _".to_string(),
            ]),
        );
        let error = backend
            .call_tool("bash", json!({"command": "true"}))
            .await
            .expect_err("dead child must fail");
        assert!(error.is_connection_failure(), "{error}");
    }

    async fn current(backend: &ChildProcessBackend) -> Option<Arc<Connection>> {
        backend.slot.lock().await.clone()
    }

    #[tokio::test]
    async fn health_check_replaces_a_child_that_died() {
        let backend = ChildProcessBackend::new(
            ChildProcessConfig::new("cat").with_health_check_interval(Duration::from_millis(50)),
        );
        backend
            .call_tool("list_directory", json!({}))
            .await
            .expect("first call");
        let first = current(&backend).await.expect("connected after first call");
        first.child.lock().await.start_kill().expect("kill child");

        let mut replacement = None;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(connection) = current(&backend).await {
                if !Arc::ptr_eq(&connection, &first) && connection.is_alive() {
                    replacement = Some(connection);
                    break;
                }
            }
        }
        let replacement = replacement.expect("health task should respawn the child");
        assert!(!first.is_alive());

        backend
            .call_tool("list_directory", json!({}))
            .await
            .expect("call after restart");
        let after = current(&backend).await.expect("still connected");
        assert!(Arc::ptr_eq(&after, &replacement));

        backend.shutdown().await;
    }

    // Serial child: answers every request in order, sleeping on `tools/call`
    // and logging each one it executes.
    const SLOW_SERIAL_CHILD: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"tools/call"'*) echo call >> "$1"; sleep 1 ;;
  esac
  printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
done
"#;

    #[tokio::test]
    async fn busy_child_is_not_recycled_and_calls_run_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("calls.log");
        let backend = ChildProcessBackend::new(
            ChildProcessConfig::new("sh")
                .with_args(vec![
                    "-c".to_string(),
                    SLOW_SERIAL_CHILD.to_string(),
                    "sh".to_string(),
                    log.to_string_lossy().into_owned(),
                ])
                .with_health_check_interval(Duration::from_millis(50)),
        );

        let result = backend
            .call_tool("bash", json!({ "command": "touch marker" }))
            .await
            .expect("slow call should complete on the same child");
        assert_eq!(result, json!({ "ok": true }));

        let executed = std::fs::read_to_string(&log).expect("call log");
        assert_eq!(executed.lines().count(), 1, "{executed:?}");
        assert!(backend.is_connected().await);

        backend.shutdown().await;
    }

    #[tokio::test]
    async fn calls_written_to_a_child_are_never_replayed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("calls.log");
        // Answers the handshake, logs the first call, then exits without replying.
        let script = r#"
IFS= read -r _init
printf '{"jsonrpc":"2.0","id":1,"result":{}}\n'
IFS= read -r _initialized
IFS= read -r _call
echo call >> "$1"
"#;
        let backend = ChildProcessBackend::new(ChildProcessConfig::new("sh").with_args(vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            log.to_string_lossy().into_owned(),
        ]));

        let error = backend
            .call_tool("bash", json!({ "command": "rm -rf build" }))
            .await
            .expect_err("child exited mid-call");
        assert!(matches!(error, BackendError::Disconnected), "{error}");

        let executed = std::fs::read_to_string(&log).expect("call log");
        assert_eq!(executed.lines().count(), 1, "{executed:?}");
    }
}
