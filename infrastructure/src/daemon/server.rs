//! Daemon accept loop and background housekeeping.

use super::auth::TokenManager;
use super::connection::{DaemonContext, handle_connection};
use super::health::{HealthRecord, remove_health, write_health};
use super::session::{SessionManager, SessionSummary};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use toolbridge_application::{CallToolUseCase, MessageBusPort};
use tracing::{debug, error, info, warn};

const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-level limits and housekeeping intervals.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    /// Largest accepted inbound frame.
    pub max_message_size: usize,
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub health_file: Option<PathBuf>,
    pub health_interval: Duration,
    pub bus_cleanup_interval: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            max_message_size: 32 * 1024 * 1024,
            handshake_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(20),
            health_file: None,
            health_interval: Duration::from_secs(5),
            bus_cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl DaemonSettings {
    pub fn with_health_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.health_file = Some(path.into());
        self
    }

    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self
    }
}

/// The dispatch daemon.
///
/// [`Daemon::serve`] borrows `self`, so an `Arc<Daemon>` can be used to
/// inspect sessions while it runs.
pub struct Daemon {
    ctx: Arc<DaemonContext>,
}

impl Daemon {
    pub fn new(settings: DaemonSettings, tokens: Arc<TokenManager>, dispatch: CallToolUseCase) -> Self {
        Self {
            ctx: Arc::new(DaemonContext {
                settings,
                tokens,
                sessions: Arc::new(SessionManager::new()),
                dispatch,
            }),
        }
    }

    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<TcpListener, DaemonError> {
        let label = addr.to_string();
        TcpListener::bind(addr)
            .await
            .map_err(|source| DaemonError::Bind { addr: label, source })
    }

    pub fn settings(&self) -> &DaemonSettings {
        &self.ctx.settings
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.ctx.tokens
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.ctx.sessions.summaries()
    }

    /// Accept connections until `shutdown` fires, then tell every session to
    /// go away and wait briefly for them to drain.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), DaemonError> {
        let local = listener.local_addr()?;
        info!("Daemon listening on {}", local);

        let mut housekeeping = JoinSet::new();
        if let Some(path) = self.ctx.settings.health_file.clone() {
            housekeeping.spawn(health_writer(
                path,
                self.ctx.settings.health_interval,
                Arc::clone(&self.ctx.sessions),
                shutdown.clone(),
            ));
        }
        housekeeping.spawn(bus_sweeper(
            Arc::clone(self.ctx.dispatch.bus()),
            self.ctx.settings.bus_cleanup_interval,
            shutdown.clone(),
        ));

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        connections.spawn(handle_connection(
                            Arc::clone(&self.ctx),
                            stream,
                            remote,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(res) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = res {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        info!("Daemon shutting down ({} connection(s) open)", connections.len());
        drop(listener);
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("Connections did not drain in time, aborting");
            connections.abort_all();
        }
        while housekeeping.join_next().await.is_some() {}
        Ok(())
    }
}

async fn health_writer(
    path: PathBuf,
    interval: Duration,
    sessions: Arc<SessionManager>,
    shutdown: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                if let Err(e) = write_health(&path, &HealthRecord::now(sessions.count())).await {
                    warn!("Failed to write health file {}: {}", path.display(), e);
                }
            }
        }
    }
    remove_health(&path).await;
    debug!("Health writer stopped");
}

async fn bus_sweeper(bus: Arc<dyn MessageBusPort>, interval: Duration, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(interval);
    // The first tick fires immediately; nothing has expired yet.
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => match bus.cleanup_expired().await {
                Ok(0) => {}
                Ok(n) => info!("Message bus: removed {} expired record(s)", n),
                Err(e) => debug!("Message bus cleanup skipped: {}", e),
            }
        }
    }
}
