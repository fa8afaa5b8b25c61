//! In-process daemon + gateway client over loopback TCP.

use super::{Daemon, DaemonSettings, TokenManager};
use crate::bus::{MemoryBusStore, MessageBusClient, MessageBusSettings};
use crate::config::FileProviderConfig;
use crate::gateway::{GatewayClient, GatewayError, GatewaySettings, GatewayState};
use crate::providers::LocalEchoProvider;
use crate::tools::BuiltinToolCatalog;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolbridge_application::{
    AdaptiveRouter, BusError, CallToolUseCase, GenerateRequest, MessageBusPort, ProviderClient,
    ProviderError, ProviderResponse, RouterParams,
};
use toolbridge_domain::{
    BusReference, CloseCode, CompressionKind, ModelProfile, ProviderProfile, ServerFrame,
};

struct Harness {
    addr: SocketAddr,
    daemon: Arc<Daemon>,
    store: Arc<MemoryBusStore>,
    bus: Arc<MessageBusClient>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), super::DaemonError>>,
}

struct HarnessOptions {
    token: &'static str,
    bus_threshold: usize,
    provider_latency: Duration,
    /// Replaces the local echo provider.
    provider: Option<Arc<dyn ProviderClient>>,
    settings: DaemonSettings,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            token: "secret",
            bus_threshold: 1024 * 1024,
            provider_latency: Duration::ZERO,
            provider: None,
            settings: DaemonSettings::default(),
        }
    }
}

impl Harness {
    async fn start(options: HarnessOptions) -> Self {
        let router = Arc::new(AdaptiveRouter::new(RouterParams::default()));
        match options.provider {
            Some(provider) => router.register(provider),
            None => {
                let profile = FileProviderConfig::local_echo().to_profile().unwrap();
                router.register(Arc::new(
                    LocalEchoProvider::new(profile).with_latency(options.provider_latency),
                ));
            }
        }

        let store = Arc::new(MemoryBusStore::new());
        let bus = Arc::new(MessageBusClient::new(
            MessageBusSettings {
                threshold_bytes: options.bus_threshold,
                compression: CompressionKind::None,
                ..Default::default()
            },
            store.clone(),
        ));
        let dispatch =
            CallToolUseCase::new(Arc::new(BuiltinToolCatalog::new()), router, bus.clone());

        let daemon = Arc::new(Daemon::new(
            options.settings,
            Arc::new(TokenManager::new(options.token)),
            dispatch,
        ));
        let listener = Daemon::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let daemon = daemon.clone();
            let shutdown = shutdown.clone();
            async move { daemon.serve(listener, shutdown).await }
        });

        Self {
            addr,
            daemon,
            store,
            bus,
            shutdown,
            handle,
        }
    }

    fn settings(&self, token: &str) -> GatewaySettings {
        GatewaySettings::new(self.addr.to_string(), token)
            .with_connect_timeout(Duration::from_secs(2), Duration::from_millis(500))
    }

    fn client(&self, token: &str) -> GatewayClient {
        GatewayClient::new(self.settings(token))
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Waits until `f` holds, polling every 10ms for up to 2s.
async fn eventually(mut f: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn handshake_list_tools_and_echo() {
    let harness = Harness::start(HarnessOptions::default()).await;
    let client = harness.client("secret");

    client.connect().await.unwrap();
    assert_eq!(client.state(), GatewayState::Ready);
    assert_eq!(harness.daemon.sessions().len(), 1);

    let tools = client.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t.name == "echo"));

    let result = client.call_tool("echo", json!({"x": 1})).await.unwrap();
    assert!(result.error.is_none());
    assert_eq!(result.outputs, Some(vec![json!({"x": 1})]));
    assert!(!result.request_id.is_empty());

    client.close().await;
    assert_eq!(client.state(), GatewayState::Closed);
    assert!(eventually(|| harness.daemon.sessions().is_empty()).await);
    harness.stop().await;
}

#[tokio::test]
async fn llm_tool_routes_to_provider() {
    let harness = Harness::start(HarnessOptions::default()).await;
    let client = harness.client("secret");

    let mut notes = Vec::new();
    let result = client
        .call_tool_with_progress("ask", json!({"prompt": "hello daemon"}), |n| {
            notes.push(n.to_string())
        })
        .await
        .unwrap();

    assert!(result.error.is_none());
    assert_eq!(result.text.as_deref(), Some("[echo-1] hello daemon"));
    assert_eq!(result.provider.as_deref(), Some("local-echo"));
    assert!(notes.iter().any(|n| n.contains("routing to local-echo")));
    harness.stop().await;
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let harness = Harness::start(HarnessOptions::default()).await;
    let client = harness.client("not-the-token");

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, GatewayError::Auth(_)), "got {:?}", err);
    assert_eq!(client.state(), GatewayState::Disconnected);
    assert!(harness.daemon.sessions().is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn empty_daemon_token_accepts_anyone() {
    let harness = Harness::start(HarnessOptions {
        token: "",
        ..Default::default()
    })
    .await;
    let client = harness.client("whatever");
    client.connect().await.unwrap();
    assert!(harness.daemon.tokens().auth_disabled());
    harness.stop().await;
}

#[tokio::test]
async fn unknown_tool_is_an_error_frame() {
    let harness = Harness::start(HarnessOptions::default()).await;
    let client = harness.client("secret");

    let err = client.call_tool("no-such-tool", json!({})).await.unwrap_err();
    assert!(matches!(err, GatewayError::Protocol(ref m) if m.contains("Unknown tool")));

    // The connection survives
    assert!(client.list_tools().await.is_ok());
    harness.stop().await;
}

#[tokio::test]
async fn concurrent_calls_are_correlated() {
    let harness = Harness::start(HarnessOptions {
        provider_latency: Duration::from_millis(50),
        ..Default::default()
    })
    .await;
    let client = harness.client("secret");
    client.connect().await.unwrap();

    let calls = (0..8).map(|i| {
        let client = &client;
        async move {
            let args = json!({"i": i});
            let result = client.call_tool("echo", args.clone()).await.unwrap();
            (args, result)
        }
    });
    let results = futures::future::join_all(calls).await;

    let mut ids = std::collections::HashSet::new();
    for (args, result) in results {
        assert_eq!(result.outputs, Some(vec![args]));
        assert!(ids.insert(result.request_id));
    }
    assert_eq!(ids.len(), 8);
    harness.stop().await;
}

#[tokio::test]
async fn ack_extends_call_deadline() {
    let harness = Harness::start(HarnessOptions {
        provider_latency: Duration::from_millis(600),
        ..Default::default()
    })
    .await;
    let settings = harness
        .settings("secret")
        .with_call_timeout(Duration::from_millis(200), Duration::from_millis(200));
    let client = GatewayClient::new(settings);

    // thinkdeep advertises a long timeout hint in its ack
    let result = client
        .call_tool("thinkdeep", json!({"prompt": "slow question"}))
        .await
        .unwrap();
    assert!(result.error.is_none());
    assert!(result.text.unwrap().starts_with("(thinking) "));
    harness.stop().await;
}

#[tokio::test]
async fn large_result_is_offloaded_and_resolved() {
    let harness = Harness::start(HarnessOptions {
        bus_threshold: 256,
        ..Default::default()
    })
    .await;
    let blob = "x".repeat(4096);

    // Without a bus the gateway hands back the reference
    let plain = harness.client("secret");
    let unresolved = plain.call_tool("echo", json!({"blob": blob})).await.unwrap();
    let reference = unresolved.message_bus.clone().unwrap();
    assert!(unresolved.outputs.is_none());
    assert!(reference.size > 256);

    // With the shared bus the payload is fetched transparently
    let resolving = harness.client("secret").with_message_bus(harness.bus.clone());
    let resolved = resolving.call_tool("echo", json!({"blob": blob})).await.unwrap();
    assert!(resolved.message_bus.is_none());
    assert_eq!(resolved.outputs, Some(vec![json!({"blob": blob})]));

    let status = harness.bus.status().unwrap();
    assert_eq!(status.stored, 2);
    assert_eq!(status.retrieved, 1);
    harness.stop().await;
}

/// Corrupts each record just before the gateway reads it back.
struct CorruptingBus {
    inner: Arc<MessageBusClient>,
    store: Arc<MemoryBusStore>,
}

#[async_trait]
impl MessageBusPort for CorruptingBus {
    fn should_use_bus(&self, size: usize) -> bool {
        self.inner.should_use_bus(size)
    }

    async fn store(
        &self,
        transaction_id: &str,
        payload: &Value,
        metadata: Map<String, Value>,
    ) -> Result<BusReference, BusError> {
        self.inner.store(transaction_id, payload, metadata).await
    }

    async fn retrieve(&self, transaction_id: &str) -> Result<Value, BusError> {
        self.store.tamper(transaction_id, |bytes| {
            if let Some(b) = bytes.iter_mut().find(|b| **b == b'x') {
                *b = b'y';
            }
        });
        self.inner.retrieve(transaction_id).await
    }

    async fn delete(&self, transaction_id: &str) -> Result<bool, BusError> {
        self.inner.delete(transaction_id).await
    }

    async fn cleanup_expired(&self) -> Result<usize, BusError> {
        self.inner.cleanup_expired().await
    }
}

#[tokio::test]
async fn corrupted_offload_reads_as_not_found() {
    let harness = Harness::start(HarnessOptions {
        bus_threshold: 256,
        ..Default::default()
    })
    .await;
    let bus = Arc::new(CorruptingBus {
        inner: harness.bus.clone(),
        store: harness.store.clone(),
    });
    let client = harness.client("secret").with_message_bus(bus);

    let err = client
        .call_tool("echo", json!({"blob": "x".repeat(4096)}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Integrity(ref m) if m.contains("not found")));
    assert_eq!(harness.bus.status().unwrap().integrity_failures, 1);
    harness.stop().await;
}

#[tokio::test]
async fn rotated_token_applies_to_new_sessions_only() {
    let harness = Harness::start(HarnessOptions::default()).await;
    let first = harness.client("secret");

    assert!(matches!(
        first.rotate_token("wrong", "fresh").await,
        Err(GatewayError::Auth(_))
    ));
    first.rotate_token("secret", "fresh").await.unwrap();

    // Already-authenticated session keeps working
    assert!(first.list_tools().await.is_ok());

    let stale = harness.client("secret");
    assert!(matches!(stale.connect().await, Err(GatewayError::Auth(_))));
    let fresh = harness.client("fresh");
    fresh.connect().await.unwrap();
    harness.stop().await;
}

#[tokio::test]
async fn keepalive_holds_idle_connection() {
    let harness = Harness::start(HarnessOptions {
        settings: DaemonSettings::default()
            .with_keepalive(Duration::from_millis(50), Duration::from_millis(100)),
        ..Default::default()
    })
    .await;
    let client = harness.client("secret");
    client.connect().await.unwrap();

    // Several ping rounds pass; the gateway answers each one
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(harness.daemon.sessions().len(), 1);
    assert!(client.list_tools().await.is_ok());
    harness.stop().await;
}

/// Never finishes a call; flags when an in-flight call is dropped.
struct HangingProvider {
    profile: ProviderProfile,
    abandoned: Arc<AtomicBool>,
}

struct FlagOnDrop(Arc<AtomicBool>);

impl Drop for FlagOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderClient for HangingProvider {
    fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<ProviderResponse, ProviderError> {
        let _flag = FlagOnDrop(self.abandoned.clone());
        std::future::pending::<()>().await;
        Err(ProviderError::Unavailable("unreachable".into()))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[tokio::test]
async fn missed_pong_closes_and_purges_session() {
    let abandoned = Arc::new(AtomicBool::new(false));
    let harness = Harness::start(HarnessOptions {
        provider: Some(Arc::new(HangingProvider {
            profile: ProviderProfile::new("hanging", ModelProfile::new("hang-1")),
            abandoned: abandoned.clone(),
        })),
        settings: DaemonSettings::default()
            .with_keepalive(Duration::from_millis(50), Duration::from_millis(100)),
        ..Default::default()
    })
    .await;

    // Authenticate, start a call that never finishes, then ignore every ping.
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream
        .write_all(
            b"{\"op\":\"hello\",\"session_id\":\"mute\",\"token\":\"secret\"}\n\
              {\"op\":\"call_tool\",\"request_id\":\"r1\",\"name\":\"chat\",\"arguments\":{\"prompt\":\"hi\"}}\n",
        )
        .await
        .unwrap();
    assert!(eventually(|| harness.daemon.sessions().len() == 1).await);

    let (code, _) = read_until_close(stream).await.unwrap();
    assert_eq!(code, CloseCode::KeepaliveTimeout.code());
    assert!(eventually(|| harness.daemon.sessions().is_empty()).await);
    assert!(
        eventually(|| abandoned.load(Ordering::SeqCst)).await,
        "in-flight provider call was not cancelled"
    );
    harness.stop().await;
}

async fn read_until_close(stream: TcpStream) -> Option<(u16, String)> {
    let mut lines = BufReader::new(stream).lines();
    let read = async {
        while let Ok(Some(line)) = lines.next_line().await {
            if let Ok(ServerFrame::Close { code, reason }) = ServerFrame::parse(&line) {
                return Some((code, reason));
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(2), read)
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn first_frame_must_be_hello() {
    let harness = Harness::start(HarnessOptions::default()).await;

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream.write_all(b"{\"op\":\"list_tools\"}\n").await.unwrap();
    let (code, _) = read_until_close(stream).await.unwrap();
    assert_eq!(code, CloseCode::ProtocolViolation.code());
    harness.stop().await;
}

#[tokio::test]
async fn raw_bad_token_closes_unauthorized() {
    let harness = Harness::start(HarnessOptions::default()).await;

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream
        .write_all(b"{\"op\":\"hello\",\"session_id\":\"raw\",\"token\":\"nope\"}\n")
        .await
        .unwrap();
    let (code, _) = read_until_close(stream).await.unwrap();
    assert_eq!(code, CloseCode::Unauthorized.code());
    harness.stop().await;
}

#[tokio::test]
async fn shutdown_closes_sessions_going_away() {
    let harness = Harness::start(HarnessOptions::default()).await;

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream
        .write_all(b"{\"op\":\"hello\",\"session_id\":\"raw\",\"token\":\"secret\"}\n")
        .await
        .unwrap();
    assert!(eventually(|| harness.daemon.sessions().len() == 1).await);

    harness.shutdown.cancel();
    let (code, _) = read_until_close(stream).await.unwrap();
    assert_eq!(code, CloseCode::GoingAway.code());
    harness.stop().await;
}
