//! Gateway client: the caller's side of the dispatch protocol.
//!
//! [`GatewayClient`] hides connection churn behind `list_tools()` and
//! `call_tool()`. One TCP connection is shared by every concurrent call;
//! a background reader task owns the read half exclusively and routes each
//! incoming frame to the waiting call by `request_id`, answering daemon
//! pings along the way.
//!
//! Lifecycle: `disconnected → connecting → handshaking → ready →
//! (operating | reconnecting) → closed`. A call that loses its transport or
//! runs past its deadline gets exactly one forced reconnect-and-retry.

use super::error::{GatewayError, Result};
use crate::daemon::health::{HealthStatus, classify_health};
use crate::wire::{FrameReader, FrameWriter};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use toolbridge_application::MessageBusPort;
use toolbridge_domain::{CallToolResult, ClientFrame, CloseCode, ServerFrame, ToolDescriptor};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_HINT: &str = "is the daemon running? Start it with `toolbridge daemon` or check gateway endpoint settings";

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// `host:port` of the daemon.
    pub endpoint: String,
    pub token: String,
    pub session_id: String,
    /// Overall budget for reaching the daemon, including retries.
    pub connect_timeout: Duration,
    /// Budget for one TCP open attempt.
    pub open_timeout: Duration,
    /// Budget for `hello` → `hello_ack`. Also bounds `list_tools` and `rotate_token`.
    pub handshake_timeout: Duration,
    /// Base deadline of a `call_tool`.
    pub call_timeout: Duration,
    /// Added to the deadline when a `call_tool_ack` extends it.
    pub ack_grace: Duration,
    pub max_backoff: Duration,
    pub max_message_size: usize,
    pub health_file: Option<PathBuf>,
    pub health_max_age: Duration,
    /// Program and arguments that start the daemon. Used at most once.
    pub spawn_command: Option<Vec<String>>,
}

impl GatewaySettings {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            session_id: format!("gw-{}", Uuid::new_v4()),
            connect_timeout: Duration::from_secs(10),
            open_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(300),
            ack_grace: Duration::from_secs(10),
            max_backoff: Duration::from_secs(2),
            max_message_size: 32 * 1024 * 1024,
            health_file: None,
            health_max_age: Duration::from_secs(30),
            spawn_command: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration, ack_grace: Duration) -> Self {
        self.call_timeout = timeout;
        self.ack_grace = ack_grace;
        self
    }

    pub fn with_connect_timeout(mut self, overall: Duration, open: Duration) -> Self {
        self.connect_timeout = overall;
        self.open_timeout = open;
        self
    }

    pub fn with_health_file(mut self, path: impl Into<PathBuf>, max_age: Duration) -> Self {
        self.health_file = Some(path.into());
        self.health_max_age = max_age;
        self
    }

    pub fn with_spawn_command(mut self, command: Vec<String>) -> Self {
        self.spawn_command = Some(command).filter(|c| !c.is_empty());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Operating,
    Reconnecting,
    Closed,
}

impl GatewayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayState::Disconnected => "disconnected",
            GatewayState::Connecting => "connecting",
            GatewayState::Handshaking => "handshaking",
            GatewayState::Ready => "ready",
            GatewayState::Operating => "operating",
            GatewayState::Reconnecting => "reconnecting",
            GatewayState::Closed => "closed",
        }
    }
}

type SharedWriter = Arc<Mutex<FrameWriter<OwnedWriteHalf>>>;
type PendingMap = Arc<StdMutex<HashMap<String, mpsc::UnboundedSender<ServerFrame>>>>;
type ControlSlot = Arc<StdMutex<Option<oneshot::Sender<ServerFrame>>>>;

fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// How one attempt failed: transport failures earn the single retry.
enum Attempt {
    Transport(GatewayError),
    Final(GatewayError),
}

impl Attempt {
    fn into_inner(self) -> GatewayError {
        match self {
            Attempt::Transport(e) | Attempt::Final(e) => e,
        }
    }
}

/// One authenticated connection.
struct Connection {
    session_id: String,
    writer: SharedWriter,
    pending: PendingMap,
    /// Waiter for the next `list_tools_res` / `rotate_token_res`.
    control: ControlSlot,
    /// Serializes control requests, which carry no request id.
    control_lock: Mutex<()>,
    alive: CancellationToken,
    close_reason: Arc<StdMutex<Option<(u16, String)>>>,
    reader_handle: JoinHandle<()>,
}

impl Connection {
    async fn send(&self, frame: &ClientFrame) -> std::result::Result<(), GatewayError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(frame)
            .await
            .map_err(|e| GatewayError::Protocol(format!("send failed: {}", e)))
    }

    fn is_alive(&self) -> bool {
        !self.alive.is_cancelled()
    }

    /// Describe why the transport went away.
    fn lost(&self) -> GatewayError {
        match lock(&self.close_reason).clone() {
            Some((code, reason)) if code == CloseCode::Unauthorized.code() => GatewayError::Auth(reason),
            Some((code, reason)) => {
                GatewayError::Protocol(format!("daemon closed the connection ({}: {})", code, reason))
            }
            None => GatewayError::Protocol("connection to daemon lost".to_string()),
        }
    }

    async fn shutdown(&self) {
        let _ = self.writer.lock().await.shutdown().await;
        self.reader_handle.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Removes a call's route when the call ends, however it ends.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    in_flight: &'a AtomicUsize,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.request_id);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn reader_loop(
    mut reader: FrameReader<OwnedReadHalf>,
    writer: SharedWriter,
    pending: PendingMap,
    control: ControlSlot,
    close_reason: Arc<StdMutex<Option<(u16, String)>>>,
    alive: CancellationToken,
    state: Arc<StdMutex<GatewayState>>,
) {
    loop {
        let frame = match reader.next_frame::<ServerFrame>().await {
            Ok(frame) => frame,
            Err(e) if e.is_fatal() => {
                debug!("Gateway reader stopped: {}", e);
                break;
            }
            Err(e) => {
                warn!("Gateway: ignoring bad frame from daemon: {}", e);
                continue;
            }
        };

        match frame {
            ServerFrame::Ping { nonce } => {
                let mut w = writer.lock().await;
                if let Err(e) = w.send(&ClientFrame::Pong { nonce }).await {
                    debug!("Gateway: pong failed: {}", e);
                    break;
                }
            }
            ServerFrame::Close { code, reason } => {
                info!("Daemon closed the connection ({}: {})", code, reason);
                *lock(&close_reason) = Some((code, reason));
                break;
            }
            ServerFrame::ListToolsRes { .. } | ServerFrame::RotateTokenRes { .. } => {
                match lock(&control).take() {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => debug!("Gateway: unsolicited '{}' ignored", frame.op()),
                }
            }
            other => match other.request_id().map(str::to_string) {
                Some(request_id) => {
                    let route = lock(&pending).get(&request_id).cloned();
                    match route {
                        Some(tx) => {
                            let _ = tx.send(other);
                        }
                        None => trace!("Gateway: frame for finished request {} ignored", request_id),
                    }
                }
                None => match other {
                    ServerFrame::Error { message, .. } => warn!("Daemon reported: {}", message),
                    other => debug!("Gateway: unexpected '{}' frame ignored", other.op()),
                },
            },
        }
    }

    alive.cancel();
    lock(&pending).clear();
    lock(&control).take();
    let mut state = lock(&state);
    if matches!(*state, GatewayState::Ready | GatewayState::Operating) {
        *state = GatewayState::Disconnected;
    }
}

pub struct GatewayClient {
    settings: GatewaySettings,
    token: StdMutex<String>,
    bus: Option<Arc<dyn MessageBusPort>>,
    state: Arc<StdMutex<GatewayState>>,
    conn: Mutex<Option<Arc<Connection>>>,
    in_flight: AtomicUsize,
    spawned: AtomicBool,
    closed: AtomicBool,
}

impl GatewayClient {
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            token: StdMutex::new(settings.token.clone()),
            settings,
            bus: None,
            state: Arc::new(StdMutex::new(GatewayState::Disconnected)),
            conn: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            spawned: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolve `message_bus` references in results through `bus`.
    pub fn with_message_bus(mut self, bus: Arc<dyn MessageBusPort>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn state(&self) -> GatewayState {
        let state = *lock(&self.state);
        if state == GatewayState::Ready && self.in_flight.load(Ordering::Relaxed) > 0 {
            GatewayState::Operating
        } else {
            state
        }
    }

    fn set_state(&self, state: GatewayState) {
        *lock(&self.state) = state;
    }

    /// Connect and handshake now instead of on the first call.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_connected().await.map(|_| ())
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(conn) = self.conn.lock().await.take() {
            conn.shutdown().await;
        }
        self.set_state(GatewayState::Closed);
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let conn = self.ensure_connected().await?;
        let frame = match self.control_once(&conn, &ClientFrame::ListTools).await {
            Ok(frame) => frame,
            Err(Attempt::Final(e)) => return Err(e),
            Err(Attempt::Transport(e)) => {
                warn!("list_tools failed ({}), reconnecting once", e);
                let conn = self.force_reconnect(&conn).await?;
                self.control_once(&conn, &ClientFrame::ListTools)
                    .await
                    .map_err(Attempt::into_inner)?
            }
        };
        match frame {
            ServerFrame::ListToolsRes { tools } => Ok(tools),
            other => Err(GatewayError::Protocol(format!(
                "expected list_tools_res, got '{}'",
                other.op()
            ))),
        }
    }

    /// Replace the daemon's auth token. Later reconnects use `new_token`.
    ///
    /// Not retried: a lost response leaves it unknown whether the rotation
    /// happened.
    pub async fn rotate_token(&self, old_token: &str, new_token: &str) -> Result<()> {
        let conn = self.ensure_connected().await?;
        let frame = ClientFrame::RotateToken {
            old_token: old_token.to_string(),
            new_token: new_token.to_string(),
        };
        match self.control_once(&conn, &frame).await.map_err(Attempt::into_inner)? {
            ServerFrame::RotateTokenRes { ok: true, .. } => {
                *lock(&self.token) = new_token.to_string();
                info!("Daemon auth token rotated");
                Ok(())
            }
            ServerFrame::RotateTokenRes { ok: false, error } => Err(GatewayError::Auth(
                error.unwrap_or_else(|| "rotation refused".to_string()),
            )),
            other => Err(GatewayError::Protocol(format!(
                "expected rotate_token_res, got '{}'",
                other.op()
            ))),
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.call_tool_with_progress(name, arguments, |_| {}).await
    }

    /// Like [`call_tool`](Self::call_tool), reporting each `progress` note.
    ///
    /// A tool-level failure comes back as `Ok` with `error` set; `Err` means
    /// the call could not be completed at all.
    pub async fn call_tool_with_progress(
        &self,
        name: &str,
        arguments: Value,
        mut on_progress: impl FnMut(&str) + Send,
    ) -> Result<CallToolResult> {
        let conn = self.ensure_connected().await?;
        let result = match self.call_once(&conn, name, &arguments, &mut on_progress).await {
            Ok(res) => res,
            Err(Attempt::Final(e)) => return Err(e),
            Err(Attempt::Transport(e)) => {
                warn!("call_tool '{}' failed ({}), reconnecting once", name, e);
                let conn = self.force_reconnect(&conn).await?;
                self.call_once(&conn, name, &arguments, &mut on_progress)
                    .await
                    .map_err(Attempt::into_inner)?
            }
        };
        self.resolve_bus_reference(result).await
    }

    async fn call_once(
        &self,
        conn: &Connection,
        name: &str,
        arguments: &Value,
        on_progress: &mut (impl FnMut(&str) + Send),
    ) -> std::result::Result<CallToolResult, Attempt> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&conn.pending).insert(request_id.clone(), tx);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let _guard = PendingGuard {
            pending: &conn.pending,
            in_flight: &self.in_flight,
            request_id: request_id.clone(),
        };

        let frame = ClientFrame::CallTool {
            request_id: request_id.clone(),
            name: name.to_string(),
            arguments: arguments.clone(),
        };
        conn.send(&frame).await.map_err(Attempt::Transport)?;
        debug!("call_tool '{}' sent as {}", name, request_id);

        let mut deadline = Instant::now() + self.settings.call_timeout;
        let mut extended = false;
        loop {
            let frame = match timeout_at(deadline, rx.recv()).await {
                Err(_) => {
                    return Err(Attempt::Transport(GatewayError::Timeout(format!(
                        "no result for '{}' ({}) before the deadline",
                        name, request_id
                    ))));
                }
                Ok(None) => return Err(Attempt::Transport(conn.lost())),
                Ok(Some(frame)) => frame,
            };

            match frame {
                ServerFrame::CallToolAck { timeout, .. } => {
                    // Only the first ack may move the deadline.
                    if !extended {
                        extended = true;
                        let hinted = timeout
                            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                            .unwrap_or_default();
                        let budget = hinted.max(self.settings.call_timeout) + self.settings.ack_grace;
                        deadline = Instant::now() + budget;
                        debug!("call_tool {} acknowledged, deadline {:?}", request_id, budget);
                    }
                }
                ServerFrame::Progress { note, .. } => {
                    trace!("call_tool {} progress: {}", request_id, note);
                    on_progress(&note);
                }
                ServerFrame::CallToolRes(res) => return Ok(res),
                ServerFrame::Error { message, kind, .. } => {
                    return Err(Attempt::Final(GatewayError::from_kind(kind, message)));
                }
                other => debug!("call_tool {}: ignoring '{}'", request_id, other.op()),
            }
        }
    }

    async fn control_once(
        &self,
        conn: &Connection,
        frame: &ClientFrame,
    ) -> std::result::Result<ServerFrame, Attempt> {
        let _serial = conn.control_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        *lock(&conn.control) = Some(tx);
        conn.send(frame).await.map_err(Attempt::Transport)?;

        match timeout(self.settings.handshake_timeout, rx).await {
            Err(_) => {
                lock(&conn.control).take();
                Err(Attempt::Transport(GatewayError::Timeout(format!(
                    "no response to '{}' within {:?}",
                    frame.op(),
                    self.settings.handshake_timeout
                ))))
            }
            Ok(Err(_)) => Err(Attempt::Transport(conn.lost())),
            Ok(Ok(response)) => Ok(response),
        }
    }

    async fn resolve_bus_reference(&self, result: CallToolResult) -> Result<CallToolResult> {
        let Some(reference) = result.message_bus.clone() else {
            return Ok(result);
        };
        let Some(bus) = &self.bus else {
            debug!(
                "Result {} offloaded as {}; no message bus configured to resolve it",
                result.request_id, reference.transaction_id
            );
            return Ok(result);
        };

        let payload = bus.retrieve(&reference.transaction_id).await?;
        let mut resolved: CallToolResult = serde_json::from_value(payload).map_err(|e| {
            GatewayError::Integrity(format!("{}: {}", reference.transaction_id, e))
        })?;
        debug!(
            "Resolved {} bytes for {} from message bus",
            reference.size, result.request_id
        );
        resolved.request_id = result.request_id;
        resolved.message_bus = None;
        resolved.provider = resolved.provider.or(result.provider);
        resolved.model = resolved.model.or(result.model);
        Ok(resolved)
    }

    // ==================== Connection management ====================

    async fn ensure_connected(&self) -> Result<Arc<Connection>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Closed);
        }
        let mut current = self.conn.lock().await;
        if let Some(conn) = current.as_ref()
            && conn.is_alive()
        {
            return Ok(Arc::clone(conn));
        }
        let reconnecting = current.take().is_some();
        let conn = Arc::new(self.open(reconnecting).await?);
        *current = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Drop `stale` (unless another caller already replaced it) and connect again.
    async fn force_reconnect(&self, stale: &Arc<Connection>) -> Result<Arc<Connection>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Closed);
        }
        let mut current = self.conn.lock().await;
        if let Some(conn) = current.as_ref() {
            if !Arc::ptr_eq(conn, stale) && conn.is_alive() {
                return Ok(Arc::clone(conn));
            }
            if let Some(old) = current.take() {
                old.shutdown().await;
            }
        }
        let conn = Arc::new(self.open(true).await?);
        *current = Some(Arc::clone(&conn));
        Ok(conn)
    }

    async fn open(&self, reconnecting: bool) -> Result<Connection> {
        self.set_state(if reconnecting {
            GatewayState::Reconnecting
        } else {
            GatewayState::Connecting
        });
        let result = async {
            let stream = self.open_transport().await?;
            self.set_state(GatewayState::Handshaking);
            self.handshake(stream).await
        }
        .await;
        match &result {
            Ok(conn) => {
                info!("Connected to daemon at {} as {}", self.settings.endpoint, conn.session_id);
                self.set_state(GatewayState::Ready);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", self.settings.endpoint, e);
                self.set_state(GatewayState::Disconnected);
            }
        }
        result
    }

    async fn health_precheck(&self) -> Option<(HealthStatus, String)> {
        let path = self.settings.health_file.as_ref()?;
        let status = classify_health(path, self.settings.health_max_age).await;
        let hint = match &status {
            HealthStatus::Fresh(record) => {
                debug!(
                    "Daemon health fresh: pid {}, {} session(s)",
                    record.pid, record.sessions
                );
                DEFAULT_HINT.to_string()
            }
            HealthStatus::Stale { record, age } => format!(
                "daemon health file {} was last updated {}s ago by pid {}; the daemon is probably dead. Restart it with `toolbridge daemon`",
                path.display(),
                age.as_secs(),
                record.pid
            ),
            HealthStatus::Missing => format!(
                "no daemon health file at {}; start the daemon with `toolbridge daemon`",
                path.display()
            ),
        };
        Some((status, hint))
    }

    /// Open TCP with per-attempt and overall deadlines, spawning the daemon
    /// at most once if configured.
    async fn open_transport(&self) -> Result<TcpStream> {
        let endpoint = self.settings.endpoint.as_str();
        let health = self.health_precheck().await;
        let stale = matches!(health, Some((HealthStatus::Stale { .. }, _)));
        let hint = health
            .map(|(_, hint)| hint)
            .unwrap_or_else(|| DEFAULT_HINT.to_string());

        let deadline = Instant::now() + self.settings.connect_timeout;
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let last_error = match timeout(self.settings.open_timeout, TcpStream::connect(endpoint)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("open timed out after {:?}", self.settings.open_timeout),
            };
            debug!("Connect to {} failed: {}", endpoint, last_error);

            let connect_error = |last_error: String| GatewayError::Connect {
                endpoint: endpoint.to_string(),
                last_error,
                hint: hint.clone(),
            };

            match &self.settings.spawn_command {
                Some(command) if !self.spawned.swap(true, Ordering::SeqCst) => {
                    spawn_daemon(command)
                        .map_err(|e| connect_error(format!("{}; spawning daemon failed: {}", last_error, e)))?;
                }
                None if stale => return Err(connect_error(last_error)),
                _ => {}
            }

            if Instant::now() + backoff > deadline {
                return Err(connect_error(last_error));
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.settings.max_backoff);
        }
    }

    async fn handshake(&self, stream: TcpStream) -> Result<Connection> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half, self.settings.max_message_size);
        let mut writer = FrameWriter::new(write_half);
        let hello = ClientFrame::Hello {
            session_id: self.settings.session_id.clone(),
            token: lock(&self.token).clone(),
        };

        let exchange = async {
            if let Err(e) = writer.send(&hello).await {
                return Err(GatewayError::Protocol(format!("hello not sent: {}", e)));
            }
            loop {
                match reader.next_frame::<ServerFrame>().await {
                    Ok(frame) => return Ok(frame),
                    Err(e) if e.is_fatal() => {
                        return Err(GatewayError::Protocol(format!(
                            "connection closed during handshake: {}",
                            e
                        )));
                    }
                    Err(e) => warn!("Gateway: ignoring bad frame during handshake: {}", e),
                }
            }
        };
        let first = timeout(self.settings.handshake_timeout, exchange)
            .await
            .map_err(|_| {
                GatewayError::Timeout(format!(
                    "no hello_ack within {:?}",
                    self.settings.handshake_timeout
                ))
            })??;

        let session_id = match first {
            ServerFrame::HelloAck { ok: true, session_id, .. } => {
                session_id.unwrap_or_else(|| self.settings.session_id.clone())
            }
            ServerFrame::HelloAck { ok: false, error, .. } => {
                return Err(GatewayError::Auth(
                    error.unwrap_or_else(|| "handshake refused".to_string()),
                ));
            }
            ServerFrame::Close { code, reason } if code == CloseCode::Unauthorized.code() => {
                return Err(GatewayError::Auth(reason));
            }
            ServerFrame::Close { code, reason } => {
                return Err(GatewayError::Protocol(format!(
                    "daemon closed the connection during handshake ({}: {})",
                    code, reason
                )));
            }
            other => {
                return Err(GatewayError::Protocol(format!(
                    "expected hello_ack, got '{}'",
                    other.op()
                )));
            }
        };

        let writer = Arc::new(Mutex::new(writer));
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let control: ControlSlot = Arc::new(StdMutex::new(None));
        let close_reason = Arc::new(StdMutex::new(None));
        let alive = CancellationToken::new();
        let reader_handle = tokio::spawn(reader_loop(
            reader,
            Arc::clone(&writer),
            Arc::clone(&pending),
            Arc::clone(&control),
            Arc::clone(&close_reason),
            alive.clone(),
            Arc::clone(&self.state),
        ));

        Ok(Connection {
            session_id,
            writer,
            pending,
            control,
            control_lock: Mutex::new(()),
            alive,
            close_reason,
            reader_handle,
        })
    }
}

fn spawn_daemon(command: &[String]) -> std::io::Result<()> {
    let (program, args) = command.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty spawn command")
    })?;
    info!("Starting daemon: {}", command.join(" "));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}
