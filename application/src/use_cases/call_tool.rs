//! Call Tool use case.
//!
//! Fulfils one `call_tool` request and streams its frames to the connection's
//! outbound channel:
//!
//! 1. Resolve the tool (unknown ⇒ `error` frame, nothing else)
//! 2. `call_tool_ack` with the tool's timeout hint
//! 3. Local tools run in-process; LLM tools are characterized, routed and
//!    sent to the chosen provider with heartbeat `progress` frames
//! 4. Deliver `call_tool_res`, offloading oversized payloads to the message bus
//!
//! Provider and bus failures never escape as errors: they become
//! `call_tool_res{error}`. The only error returned is a closed outbound channel.

use crate::config::{DispatchParams, RetryPolicy};
use crate::ports::message_bus::MessageBusPort;
use crate::ports::provider_client::{GenerateParams, GenerateRequest};
use crate::ports::tool_catalog::ToolCatalog;
use crate::use_cases::adaptive_router::AdaptiveRouter;
use crate::use_cases::invoke_provider::{InvokeError, Invocation, invoke_with_retry};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolbridge_domain::util::preview_json;
use toolbridge_domain::{
    CallToolResult, ErrorKind, ServerFrame, ToolDefinition, ToolDescriptor, ToolKind, characterize,
};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Outbound channel closed")]
    ChannelClosed,
}

pub struct CallToolUseCase {
    catalog: Arc<dyn ToolCatalog>,
    router: Arc<AdaptiveRouter>,
    bus: Arc<dyn MessageBusPort>,
    retry: RetryPolicy,
    params: DispatchParams,
}

impl Clone for CallToolUseCase {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            router: self.router.clone(),
            bus: self.bus.clone(),
            retry: self.retry,
            params: self.params.clone(),
        }
    }
}

impl CallToolUseCase {
    pub fn new(
        catalog: Arc<dyn ToolCatalog>,
        router: Arc<AdaptiveRouter>,
        bus: Arc<dyn MessageBusPort>,
    ) -> Self {
        Self {
            catalog,
            router,
            bus,
            retry: RetryPolicy::default(),
            params: DispatchParams::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_params(mut self, params: DispatchParams) -> Self {
        self.params = params;
        self
    }

    pub fn router(&self) -> &Arc<AdaptiveRouter> {
        &self.router
    }

    pub fn bus(&self) -> &Arc<dyn MessageBusPort> {
        &self.bus
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.catalog.spec().descriptors()
    }

    /// Run one tool call to completion, sending every frame through `tx`.
    pub async fn execute(
        &self,
        request_id: &str,
        name: &str,
        arguments: &Value,
        tx: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let Some(tool) = self.catalog.spec().get(name).cloned() else {
            warn!("call_tool {}: unknown tool '{}'", request_id, name);
            return send(
                tx,
                ServerFrame::request_error(
                    request_id,
                    format!("Unknown tool: {}", name),
                    ErrorKind::Protocol,
                ),
            )
            .await;
        };

        let timeout = tool
            .timeout_hint_secs
            .map(|s| s as f64)
            .unwrap_or(self.params.default_call_timeout.as_secs_f64());
        send(
            tx,
            ServerFrame::CallToolAck {
                request_id: request_id.to_string(),
                timeout: Some(timeout),
            },
        )
        .await?;

        let started = Instant::now();
        let result = match &tool.kind {
            ToolKind::Local => match self.catalog.run_local(tool.name(), arguments) {
                Ok(outputs) => CallToolResult::outputs(request_id, outputs),
                Err(e) => CallToolResult::error(request_id, e.kind(), e.to_string()),
            },
            ToolKind::Llm { system_prompt } => {
                self.run_llm(request_id, &tool, system_prompt, arguments, tx, cancel)
                    .await?
            }
        };

        let result = self.deliverable(result, tool.name()).await;
        info!(
            "call_tool {} ({}) finished in {:?}{}",
            request_id,
            tool.name(),
            started.elapsed(),
            if result.is_error() { " with error" } else { "" }
        );
        send(tx, ServerFrame::CallToolRes(result)).await
    }

    async fn run_llm(
        &self,
        request_id: &str,
        tool: &ToolDefinition,
        system_prompt: &str,
        arguments: &Value,
        tx: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, DispatchError> {
        let prompt = match self.catalog.build_prompt(tool.name(), arguments) {
            Ok(p) => p,
            Err(e) => return Ok(CallToolResult::error(request_id, e.kind(), e.to_string())),
        };

        let chars = characterize(tool.name(), arguments, &tool.requirements);
        let decision = match self.router.select(&chars) {
            Ok(d) => d,
            Err(e) => return Ok(CallToolResult::error(request_id, e.kind(), e.to_string())),
        };
        // Covers a closed channel before the provider call starts.
        let _probe = self.router.probe_guard(&decision.provider);
        debug!("call_tool {}: {}", request_id, decision.summary());

        let note = if decision.degraded {
            format!(
                "routing to {} ({}) in degraded mode",
                decision.provider, decision.model
            )
        } else {
            format!("routing to {} ({})", decision.provider, decision.model)
        };
        send(
            tx,
            ServerFrame::Progress {
                request_id: request_id.to_string(),
                note,
            },
        )
        .await?;

        let request = GenerateRequest::new(&decision.model, prompt)
            .with_system_prompt(system_prompt)
            .with_params(GenerateParams {
                thinking: chars.needs_thinking,
                ..GenerateParams::default()
            });

        let outcome = self
            .invoke_with_heartbeat(request_id, &decision.provider, &request, tx, cancel)
            .await?;

        Ok(match outcome {
            Ok(invocation) => {
                CallToolResult::text(request_id, invocation.response.content)
                    .with_route(&decision.provider, invocation.response.model)
            }
            Err(e) => {
                warn!("call_tool {}: {}", request_id, e);
                CallToolResult::error(request_id, e.kind(), e.to_string())
                    .with_route(&decision.provider, &decision.model)
            }
        })
    }

    /// Drive the provider call while emitting a `progress` frame every
    /// `progress_interval`.
    async fn invoke_with_heartbeat(
        &self,
        request_id: &str,
        provider: &str,
        request: &GenerateRequest,
        tx: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> Result<Result<Invocation, InvokeError>, DispatchError> {
        let started = Instant::now();
        let call = invoke_with_retry(&self.router, provider, request, &self.retry, cancel);
        tokio::pin!(call);

        let mut ticker = tokio::time::interval(self.params.progress_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                outcome = &mut call => return Ok(outcome),
                _ = ticker.tick() => {
                    send(
                        tx,
                        ServerFrame::Progress {
                            request_id: request_id.to_string(),
                            note: format!(
                                "waiting on {} ({}s)",
                                provider,
                                started.elapsed().as_secs()
                            ),
                        },
                    )
                    .await?;
                }
            }
        }
    }

    /// Apply size policy: offload to the bus above its threshold, fall back to
    /// inline when the bus fails and the payload still fits.
    async fn deliverable(&self, result: CallToolResult, tool_name: &str) -> CallToolResult {
        if result.is_error() {
            return result;
        }

        let payload = match serde_json::to_value(&result) {
            Ok(v) => v,
            Err(e) => {
                return CallToolResult::error(
                    &result.request_id,
                    ErrorKind::Protocol,
                    format!("Failed to serialize result: {}", e),
                );
            }
        };
        let size = payload.to_string().len();

        if self.bus.should_use_bus(size) {
            let transaction_id = uuid::Uuid::new_v4().to_string();
            let mut metadata = Map::new();
            metadata.insert("request_id".into(), json!(result.request_id));
            metadata.insert("tool".into(), json!(tool_name));

            match self.bus.store(&transaction_id, &payload, metadata).await {
                Ok(reference) => {
                    info!(
                        "call_tool {}: {} bytes offloaded to message bus as {}",
                        result.request_id, size, reference.transaction_id
                    );
                    let mut offloaded = CallToolResult::offloaded(&result.request_id, reference);
                    offloaded.provider = result.provider;
                    offloaded.model = result.model;
                    return offloaded;
                }
                Err(e) => {
                    warn!(
                        "call_tool {}: message bus store failed ({}), trying inline",
                        result.request_id, e
                    );
                }
            }
        }

        if size > self.params.max_inline_bytes {
            warn!(
                "call_tool {}: result of {} bytes exceeds inline limit {}",
                result.request_id, size, self.params.max_inline_bytes
            );
            return CallToolResult::error(
                &result.request_id,
                ErrorKind::Capacity,
                format!(
                    "Result too large to deliver inline ({} bytes, limit {})",
                    size, self.params.max_inline_bytes
                ),
            );
        }

        debug!(
            "call_tool {}: inline result {}",
            result.request_id,
            preview_json(&payload, 200)
        );
        result
    }
}

async fn send(tx: &mpsc::Sender<ServerFrame>, frame: ServerFrame) -> Result<(), DispatchError> {
    tx.send(frame).await.map_err(|_| DispatchError::ChannelClosed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterParams;
    use crate::ports::message_bus::{BusError, DisabledMessageBus};
    use crate::ports::provider_client::{
        ProviderClient, ProviderError, ProviderResponse,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use toolbridge_domain::{
        BusReference, DomainError, ModelProfile, ProviderProfile, ToolSpec,
    };

    // -- Mocks -----------------------------------------------------------------

    struct MockCatalog {
        spec: ToolSpec,
    }

    impl MockCatalog {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                spec: ToolSpec::new()
                    .register(ToolDefinition::local("echo", "Echo arguments"))
                    .register(ToolDefinition::llm("chat", "Chat", "be brief").with_timeout_hint(42)),
            })
        }
    }

    impl ToolCatalog for MockCatalog {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        fn run_local(&self, name: &str, arguments: &Value) -> Result<Vec<Value>, DomainError> {
            match name {
                "echo" => Ok(vec![arguments.clone()]),
                other => Err(DomainError::UnknownTool(other.to_string())),
            }
        }

        fn build_prompt(&self, _name: &str, arguments: &Value) -> Result<String, DomainError> {
            arguments
                .get("prompt")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DomainError::InvalidArguments("missing 'prompt'".into()))
        }
    }

    struct MockProvider {
        profile: ProviderProfile,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl ProviderClient for MockProvider {
        fn profile(&self) -> &ProviderProfile {
            &self.profile
        }

        async fn generate(&self, request: &GenerateRequest) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::Auth("rejected".into()));
            }
            Ok(ProviderResponse {
                content: format!("answer to {}", request.prompt),
                model: request.model.clone(),
                tokens_used: 3,
            })
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    /// In-memory bus with a configurable threshold and failure switch.
    struct MockBus {
        threshold: usize,
        fail: bool,
        stored: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl MessageBusPort for MockBus {
        fn should_use_bus(&self, size: usize) -> bool {
            size > self.threshold
        }

        async fn store(
            &self,
            transaction_id: &str,
            payload: &Value,
            _metadata: Map<String, Value>,
        ) -> Result<BusReference, BusError> {
            if self.fail {
                return Err(BusError::Storage("disk full".into()));
            }
            let size = payload.to_string().len();
            self.stored
                .lock()
                .unwrap()
                .insert(transaction_id.to_string(), payload.clone());
            Ok(BusReference {
                transaction_id: transaction_id.to_string(),
                size: size as u64,
                checksum: "abc".into(),
            })
        }

        async fn retrieve(&self, transaction_id: &str) -> Result<Value, BusError> {
            self.stored
                .lock()
                .unwrap()
                .get(transaction_id)
                .cloned()
                .ok_or_else(|| BusError::NotFound(transaction_id.to_string()))
        }

        async fn delete(&self, transaction_id: &str) -> Result<bool, BusError> {
            Ok(self.stored.lock().unwrap().remove(transaction_id).is_some())
        }

        async fn cleanup_expired(&self) -> Result<usize, BusError> {
            Ok(0)
        }
    }

    // -- Helpers ---------------------------------------------------------------

    fn use_case_with(
        provider: Option<MockProvider>,
        bus: Arc<dyn MessageBusPort>,
    ) -> CallToolUseCase {
        let router = Arc::new(AdaptiveRouter::new(RouterParams::default()));
        if let Some(p) = provider {
            router.register(Arc::new(p));
        }
        CallToolUseCase::new(MockCatalog::new(), router, bus).with_retry(RetryPolicy::no_retry())
    }

    fn provider(fail: bool) -> MockProvider {
        MockProvider {
            profile: ProviderProfile::new("mock", ModelProfile::new("mock-1")),
            fail,
            delay: Duration::ZERO,
        }
    }

    async fn run(
        uc: &CallToolUseCase,
        name: &str,
        arguments: Value,
    ) -> Vec<ServerFrame> {
        let (tx, mut rx) = mpsc::channel(64);
        uc.execute("r1", name, &arguments, &tx, &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        let mut frames = Vec::new();
        while let Some(f) = rx.recv().await {
            frames.push(f);
        }
        frames
    }

    fn final_result(frames: &[ServerFrame]) -> &CallToolResult {
        match frames.last() {
            Some(ServerFrame::CallToolRes(r)) => r,
            other => panic!("expected call_tool_res, got {:?}", other),
        }
    }

    // -- Tests -----------------------------------------------------------------

    #[tokio::test]
    async fn echo_acks_then_returns_outputs() {
        let uc = use_case_with(None, Arc::new(DisabledMessageBus));
        let frames = run(&uc, "echo", json!({"x": 1})).await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            &frames[0],
            ServerFrame::CallToolAck { request_id, timeout: Some(t) } if request_id == "r1" && *t == 300.0
        ));
        let res = final_result(&frames);
        assert_eq!(res.request_id, "r1");
        assert_eq!(res.outputs, Some(vec![json!({"x": 1})]));
        assert!(!res.is_error());
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_frame_only() {
        let uc = use_case_with(None, Arc::new(DisabledMessageBus));
        let frames = run(&uc, "nope", json!({})).await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            ServerFrame::Error { request_id: Some(id), kind: Some(ErrorKind::Protocol), .. } if id == "r1"
        ));
    }

    #[tokio::test]
    async fn llm_tool_routes_and_reports_provider() {
        let uc = use_case_with(Some(provider(false)), Arc::new(DisabledMessageBus));
        let frames = run(&uc, "chat", json!({"prompt": "why"})).await;
        assert!(matches!(
            &frames[0],
            ServerFrame::CallToolAck { timeout: Some(t), .. } if *t == 42.0
        ));
        assert!(frames
            .iter()
            .any(|f| matches!(f, ServerFrame::Progress { note, .. } if note.contains("mock"))));
        let res = final_result(&frames);
        assert_eq!(res.text.as_deref(), Some("answer to why"));
        assert_eq!(res.provider.as_deref(), Some("mock"));
        assert_eq!(res.model.as_deref(), Some("mock-1"));
    }

    #[tokio::test]
    async fn provider_error_becomes_result_error() {
        let uc = use_case_with(Some(provider(true)), Arc::new(DisabledMessageBus));
        let frames = run(&uc, "chat", json!({"prompt": "why"})).await;
        let res = final_result(&frames);
        assert!(res.is_error());
        assert_eq!(res.kind, Some(ErrorKind::Provider));
        assert_eq!(uc.router().metrics_snapshot()[0].failure_count, 1);
    }

    #[tokio::test]
    async fn no_providers_is_capacity_error() {
        let uc = use_case_with(None, Arc::new(DisabledMessageBus));
        let frames = run(&uc, "chat", json!({"prompt": "why"})).await;
        assert_eq!(final_result(&frames).kind, Some(ErrorKind::Capacity));
    }

    #[tokio::test]
    async fn large_result_is_offloaded() {
        let bus = Arc::new(MockBus {
            threshold: 64,
            fail: false,
            stored: Mutex::new(HashMap::new()),
        });
        let uc = use_case_with(None, bus.clone());
        let big = "x".repeat(500);
        let frames = run(&uc, "echo", json!({"data": big})).await;
        let res = final_result(&frames);
        let reference = res.message_bus.as_ref().expect("offloaded");
        assert!(res.outputs.is_none());

        let stored = bus.retrieve(&reference.transaction_id).await.unwrap();
        let original: CallToolResult = serde_json::from_value(stored).unwrap();
        assert_eq!(original.outputs, Some(vec![json!({"data": big})]));
    }

    #[tokio::test]
    async fn bus_failure_falls_back_inline_when_it_fits() {
        let bus = Arc::new(MockBus {
            threshold: 64,
            fail: true,
            stored: Mutex::new(HashMap::new()),
        });
        let uc = use_case_with(None, bus);
        let frames = run(&uc, "echo", json!({"data": "y".repeat(500)})).await;
        let res = final_result(&frames);
        assert!(res.message_bus.is_none());
        assert!(res.outputs.is_some());
    }

    #[tokio::test]
    async fn bus_failure_over_inline_limit_is_error() {
        let bus = Arc::new(MockBus {
            threshold: 64,
            fail: true,
            stored: Mutex::new(HashMap::new()),
        });
        let uc = use_case_with(None, bus)
            .with_params(DispatchParams::default().with_max_inline_bytes(128));
        let frames = run(&uc, "echo", json!({"data": "y".repeat(500)})).await;
        let res = final_result(&frames);
        assert_eq!(res.kind, Some(ErrorKind::Capacity));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_emits_heartbeats() {
        let mut slow = provider(false);
        slow.delay = Duration::from_secs(25);
        let uc = use_case_with(Some(slow), Arc::new(DisabledMessageBus));
        let frames = run(&uc, "chat", json!({"prompt": "p"})).await;
        let waiting = frames
            .iter()
            .filter(|f| matches!(f, ServerFrame::Progress { note, .. } if note.starts_with("waiting")))
            .count();
        assert_eq!(waiting, 2);
        assert!(!final_result(&frames).is_error());
    }
}
