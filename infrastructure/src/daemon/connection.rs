//! Per-connection dispatch loop.
//!
//! Each accepted connection runs three tasks:
//!
//! - a **reader** that owns the read half and forwards parsed frames,
//! - a **writer** that owns the write half and drains the outbound channel
//!   (so frames for one request keep their send order),
//! - the **dispatch loop** here, which does the handshake, answers
//!   `list_tools`/`rotate_token`, spawns one task per `call_tool`, and
//!   runs the ping/pong keepalive.

use super::auth::TokenManager;
use super::server::DaemonSettings;
use super::session::{SessionError, SessionManager};
use crate::wire::{FrameReader, FrameWriter, ProtocolError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval_at, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use toolbridge_application::CallToolUseCase;
use toolbridge_domain::{ClientFrame, CloseCode, ErrorKind, ServerFrame};
use tracing::{debug, info, trace, warn};

const OUTBOUND_CAPACITY: usize = 256;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Long-lived objects shared by every connection.
pub(crate) struct DaemonContext {
    pub settings: DaemonSettings,
    pub tokens: Arc<TokenManager>,
    pub sessions: Arc<SessionManager>,
    pub dispatch: CallToolUseCase,
}

/// What the reader task hands to the dispatch loop.
#[derive(Debug)]
enum Inbound {
    Frame(ClientFrame),
    Malformed(ProtocolError),
    Closed(ProtocolError),
}

fn spawn_reader(read_half: OwnedReadHalf, max_frame: usize) -> (mpsc::Receiver<Inbound>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = tokio::spawn(async move {
        let mut reader = FrameReader::new(read_half, max_frame);
        loop {
            let inbound = match reader.next_frame::<ClientFrame>().await {
                Ok(frame) => Inbound::Frame(frame),
                Err(e) if e.is_fatal() => {
                    let _ = tx.send(Inbound::Closed(e)).await;
                    break;
                }
                Err(e) => Inbound::Malformed(e),
            };
            if tx.send(inbound).await.is_err() {
                break;
            }
        }
    });
    (rx, handle)
}

fn spawn_writer(write_half: OwnedWriteHalf) -> (mpsc::Sender<ServerFrame>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);
    let handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(write_half);
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, ServerFrame::Close { .. });
            if let Err(e) = writer.send(&frame).await {
                debug!("Writer: send failed: {}", e);
                break;
            }
            if closing {
                let _ = writer.shutdown().await;
                break;
            }
        }
    });
    (tx, handle)
}

fn close_frame(code: CloseCode) -> ServerFrame {
    ServerFrame::Close {
        code: code.code(),
        reason: code.reason().to_string(),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Run one connection to completion.
pub(crate) async fn handle_connection(
    ctx: Arc<DaemonContext>,
    stream: TcpStream,
    remote: SocketAddr,
    shutdown: CancellationToken,
) {
    let connection_id = ctx.sessions.next_connection_id();
    debug!("Connection {} accepted from {}", connection_id, remote);
    let _ = stream.set_nodelay(true);

    let (read_half, write_half) = stream.into_split();
    let (mut inbound, reader_handle) = spawn_reader(read_half, ctx.settings.max_message_size);
    let (outbound, writer_handle) = spawn_writer(write_half);

    let registered = handshake(&ctx, connection_id, remote, &mut inbound, &outbound, &shutdown).await;
    if let Some(session_cancel) = registered {
        dispatch_loop(&ctx, connection_id, &mut inbound, &outbound, &session_cancel, &shutdown).await;
        ctx.sessions.purge(connection_id);
    }

    drop(outbound);
    if timeout(WRITER_DRAIN_TIMEOUT, writer_handle).await.is_err() {
        debug!("Connection {}: writer did not drain in time", connection_id);
    }
    reader_handle.abort();
    debug!("Connection {} closed", connection_id);
}

/// Wait for `hello`, validate its token, register the session.
async fn handshake(
    ctx: &DaemonContext,
    connection_id: u64,
    remote: SocketAddr,
    inbound: &mut mpsc::Receiver<Inbound>,
    outbound: &mpsc::Sender<ServerFrame>,
    shutdown: &CancellationToken,
) -> Option<CancellationToken> {
    let first = tokio::select! {
        r = timeout(ctx.settings.handshake_timeout, inbound.recv()) => r,
        _ = shutdown.cancelled() => {
            let _ = outbound.send(close_frame(CloseCode::GoingAway)).await;
            return None;
        }
    };

    match first {
        Err(_) => {
            warn!("Connection {}: no hello within {:?}", connection_id, ctx.settings.handshake_timeout);
            let _ = outbound.send(close_frame(CloseCode::ProtocolViolation)).await;
            None
        }
        Ok(None) | Ok(Some(Inbound::Closed(_))) => {
            debug!("Connection {}: closed before hello", connection_id);
            None
        }
        Ok(Some(Inbound::Frame(ClientFrame::Hello { session_id, token }))) => {
            if let Err(e) = ctx.tokens.validate(&token, &session_id) {
                let _ = outbound
                    .send(ServerFrame::HelloAck {
                        ok: false,
                        session_id: None,
                        error: Some(e.to_string()),
                    })
                    .await;
                let _ = outbound.send(close_frame(CloseCode::Unauthorized)).await;
                return None;
            }
            let cancel = ctx.sessions.register(connection_id, &session_id, remote, shutdown);
            let ack = ServerFrame::HelloAck {
                ok: true,
                session_id: Some(session_id),
                error: None,
            };
            if outbound.send(ack).await.is_err() {
                ctx.sessions.purge(connection_id);
                return None;
            }
            Some(cancel)
        }
        Ok(Some(Inbound::Frame(other))) => {
            warn!(
                "Connection {}: first frame was '{}', expected hello",
                connection_id,
                other.op()
            );
            let _ = outbound.send(close_frame(CloseCode::ProtocolViolation)).await;
            None
        }
        Ok(Some(Inbound::Malformed(e))) => {
            warn!("Connection {}: malformed first frame: {}", connection_id, e);
            let _ = outbound.send(close_frame(CloseCode::ProtocolViolation)).await;
            None
        }
    }
}

async fn dispatch_loop(
    ctx: &DaemonContext,
    connection_id: u64,
    inbound: &mut mpsc::Receiver<Inbound>,
    outbound: &mpsc::Sender<ServerFrame>,
    session_cancel: &CancellationToken,
    shutdown: &CancellationToken,
) {
    let ping_interval = ctx.settings.ping_interval;
    let mut ping_tick = interval_at(Instant::now() + ping_interval, ping_interval);
    let mut nonce: u64 = 0;
    // Set while a ping is unanswered: (nonce, deadline).
    let mut awaiting_pong: Option<(u64, Instant)> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Connection {}: daemon shutting down", connection_id);
                let _ = outbound.send(close_frame(CloseCode::GoingAway)).await;
                return;
            }
            _ = sleep_until_opt(awaiting_pong.map(|(_, deadline)| deadline)) => {
                warn!(
                    "Connection {}: no pong within {:?}, closing",
                    connection_id, ctx.settings.ping_timeout
                );
                let _ = outbound.send(close_frame(CloseCode::KeepaliveTimeout)).await;
                return;
            }
            _ = ping_tick.tick() => {
                if awaiting_pong.is_none() {
                    nonce += 1;
                    trace!("Connection {}: ping {}", connection_id, nonce);
                    if outbound.send(ServerFrame::Ping { nonce }).await.is_err() {
                        return;
                    }
                    awaiting_pong = Some((nonce, Instant::now() + ctx.settings.ping_timeout));
                }
            }
            msg = inbound.recv() => {
                let frame = match msg {
                    None | Some(Inbound::Closed(_)) => {
                        debug!("Connection {}: peer closed", connection_id);
                        return;
                    }
                    Some(Inbound::Malformed(e)) => {
                        warn!("Connection {}: ignoring bad frame: {}", connection_id, e);
                        let _ = outbound.send(ServerFrame::error(e.to_string(), ErrorKind::Protocol)).await;
                        continue;
                    }
                    Some(Inbound::Frame(frame)) => frame,
                };
                // Any inbound traffic proves the peer is alive.
                awaiting_pong = None;

                match frame {
                    ClientFrame::Pong { nonce: n } => {
                        trace!("Connection {}: pong {}", connection_id, n);
                    }
                    ClientFrame::ListTools => {
                        let tools = ctx.dispatch.list_tools();
                        if outbound.send(ServerFrame::ListToolsRes { tools }).await.is_err() {
                            return;
                        }
                    }
                    ClientFrame::CallTool { request_id, name, arguments } => {
                        start_call(ctx, connection_id, request_id, name, arguments, outbound).await;
                    }
                    ClientFrame::RotateToken { old_token, new_token } => {
                        let session = format!("connection-{}", connection_id);
                        let res = match ctx.tokens.rotate(&old_token, &new_token, &session) {
                            Ok(()) => ServerFrame::RotateTokenRes { ok: true, error: None },
                            Err(e) => ServerFrame::RotateTokenRes { ok: false, error: Some(e.to_string()) },
                        };
                        if outbound.send(res).await.is_err() {
                            return;
                        }
                    }
                    ClientFrame::Hello { .. } => {
                        warn!("Connection {}: unexpected hello after handshake, ignored", connection_id);
                    }
                }
            }
        }

        if session_cancel.is_cancelled() {
            return;
        }
    }
}

async fn start_call(
    ctx: &DaemonContext,
    connection_id: u64,
    request_id: String,
    name: String,
    arguments: serde_json::Value,
    outbound: &mpsc::Sender<ServerFrame>,
) {
    let cancel = match ctx.sessions.begin_request(connection_id, &request_id) {
        Ok(token) => token,
        Err(e @ SessionError::DuplicateRequest(_)) => {
            warn!("Connection {}: {}", connection_id, e);
            let _ = outbound
                .send(ServerFrame::request_error(&request_id, e.to_string(), ErrorKind::Protocol))
                .await;
            return;
        }
        Err(e) => {
            debug!("Connection {}: {}", connection_id, e);
            return;
        }
    };

    debug!("Connection {}: call_tool {} ({})", connection_id, request_id, name);
    let dispatch = ctx.dispatch.clone();
    let sessions = Arc::clone(&ctx.sessions);
    let tx = outbound.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatch.execute(&request_id, &name, &arguments, &tx, &cancel).await {
            debug!("call_tool {} abandoned: {}", request_id, e);
        }
        sessions.finish_request(connection_id, &request_id);
    });
}
