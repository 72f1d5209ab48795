//! 弹性调用客户端
//!
//! 每次 call 依次经过：注册表查找 → 缓存 → 熔断预检 → 带硬超时的一次往返 → 更新熔断 / 缓存。
//! 所有失败都作为 CallFailure 返回；每次调用输出一行结构化审计日志（JSON）。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::client::breaker::{Admission, BreakerConfig, BreakerState};
use crate::client::cache::{cache_key, CacheConfig, CacheEntry};
use crate::client::registry::{EndpointRegistry, EndpointSpec, RegistryError};
use crate::client::state::{ClientState, ClientStatePersistence, MemoryPersistence};
use crate::client::transport::{
    HttpTransport, InProcessTransport, StdioTransport, Transport, TransportError,
};
use crate::client::types::{
    CallErrorCode, CallFailure, CallOptions, CallResult, CallSuccess, RpcRequest,
};
use crate::core::{Clock, SystemClock};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    /// 单次往返的硬超时
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

struct Route {
    server_id: String,
    transport: Arc<dyn Transport>,
}

pub struct CallClient {
    routes: HashMap<String, Route>,
    servers: HashMap<String, Arc<dyn Transport>>,
    config: ClientConfig,
    state: Mutex<ClientState>,
    persistence: Arc<dyn ClientStatePersistence>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

/// CallClient 构建器：注册表在 build 时解析一次
pub struct CallClientBuilder {
    registry: EndpointRegistry,
    config: ClientConfig,
    persistence: Arc<dyn ClientStatePersistence>,
    clock: Arc<dyn Clock>,
    local_tools: Option<Arc<ToolRegistry>>,
    overrides: HashMap<String, Arc<dyn Transport>>,
}

impl CallClientBuilder {
    pub fn new(registry: EndpointRegistry) -> Self {
        Self {
            registry,
            config: ClientConfig::default(),
            persistence: Arc::new(MemoryPersistence::new()),
            clock: Arc::new(SystemClock),
            local_tools: None,
            overrides: HashMap::new(),
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn ClientStatePersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// in_process 端点使用的工具集
    pub fn local_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.local_tools = Some(tools);
        self
    }

    /// 为某个 server 指定传输（测试或自定义端点）
    pub fn transport(mut self, server_id: &str, transport: Arc<dyn Transport>) -> Self {
        self.overrides.insert(server_id.to_string(), transport);
        self
    }

    pub fn build(mut self) -> Result<CallClient, RegistryError> {
        let mut servers: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        for (id, endpoint) in self.registry.servers() {
            let transport = match self.overrides.remove(id) {
                Some(t) => t,
                None => connect(id, endpoint, self.local_tools.as_ref())?,
            };
            servers.insert(id.clone(), transport);
        }

        let mut routes = HashMap::new();
        for (id, transport) in &servers {
            for tool in self.registry.tools_of(id) {
                routes.insert(
                    tool.to_string(),
                    Route {
                        server_id: id.clone(),
                        transport: transport.clone(),
                    },
                );
            }
        }

        let state = match self.persistence.load() {
            Ok(s) => s.settle(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load client state, starting empty");
                ClientState::default()
            }
        };
        tracing::info!(servers = servers.len(), tools = routes.len(), "call client ready");

        Ok(CallClient {
            routes,
            servers,
            config: self.config,
            state: Mutex::new(state),
            persistence: self.persistence,
            clock: self.clock,
            next_id: AtomicU64::new(1),
        })
    }
}

fn connect(
    server_id: &str,
    endpoint: &EndpointSpec,
    local_tools: Option<&Arc<ToolRegistry>>,
) -> Result<Arc<dyn Transport>, RegistryError> {
    Ok(match endpoint {
        EndpointSpec::InProcess => {
            let tools = local_tools
                .ok_or_else(|| RegistryError::MissingLocalTools(server_id.to_string()))?;
            Arc::new(InProcessTransport::new(tools.clone()))
        }
        EndpointSpec::Stdio { command, args, cwd } => {
            Arc::new(StdioTransport::new(command.clone(), args.clone(), cwd.clone()))
        }
        EndpointSpec::Http { url } => Arc::new(HttpTransport::new(url.clone())),
    })
}

/// 试探调用的守卫：未正常结束（调用方丢弃 future）时重新打开熔断
struct TrialGuard<'a> {
    client: &'a CallClient,
    tool: &'a str,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let now = self.client.clock.now();
        let mut state = self.client.lock_state();
        state.breaker_mut(self.tool).abandon_trial(now);
        self.client.persist(&state);
        tracing::warn!(tool = %self.tool, "circuit trial abandoned, breaker re-opened");
    }
}

impl CallClient {
    pub fn builder(registry: EndpointRegistry) -> CallClientBuilder {
        CallClientBuilder::new(registry)
    }

    pub async fn call(&self, tool: &str, args: Value) -> CallResult {
        self.call_with(tool, args, CallOptions::default()).await
    }

    pub async fn call_with(&self, tool: &str, args: Value, options: CallOptions) -> CallResult {
        let preview = args_preview(&args);
        let result = self.dispatch(tool, args, options).await;
        audit(tool, &preview, &result);
        result
    }

    async fn dispatch(&self, tool: &str, args: Value, options: CallOptions) -> CallResult {
        let Some(route) = self.routes.get(tool) else {
            return Err(CallFailure::unknown_tool(tool));
        };
        let now = self.clock.now();
        let key = (options.use_cache && self.config.cache.is_eligible(tool))
            .then(|| cache_key(tool, &args));

        let admission = {
            let mut state = self.lock_state();
            if let Some(ref key) = key {
                if let Some(entry) = state.cache.get(key) {
                    if entry.is_fresh(now, self.config.cache.ttl) {
                        let circuit = state.breakers.get(tool).map(|b| b.state).unwrap_or_default();
                        return Ok(CallSuccess {
                            tool: tool.to_string(),
                            server_id: route.server_id.clone(),
                            result: entry.result.clone(),
                            latency_ms: 0,
                            from_cache: true,
                            circuit,
                        });
                    }
                }
            }
            let breaker = state.breaker_mut(tool);
            let admission = breaker.admit(now, &self.config.breaker);
            match admission {
                Admission::Reject => {
                    let circuit = breaker.state;
                    return Err(CallFailure {
                        tool: tool.to_string(),
                        server_id: Some(route.server_id.clone()),
                        code: CallErrorCode::CircuitOpen,
                        message: "circuit open".to_string(),
                        circuit: Some(circuit),
                        latency_ms: 0,
                    });
                }
                Admission::Trial => {
                    tracing::info!(tool = %tool, "circuit half-open, sending trial call");
                    self.persist(&state);
                }
                Admission::Allow => {}
            }
            admission
        };

        let mut guard = TrialGuard {
            client: self,
            tool,
            armed: admission == Admission::Trial,
        };
        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let request = RpcRequest::call(self.next_id.fetch_add(1, Ordering::Relaxed), tool, args);
        let start = Instant::now();
        let outcome =
            match tokio::time::timeout(timeout, route.transport.request(&request, timeout)).await {
                Err(_) | Ok(Err(TransportError::Timeout(_))) => Err((
                    CallErrorCode::Timeout,
                    format!("no response within {} ms", timeout.as_millis()),
                )),
                Ok(Err(TransportError::BadResponse(m))) => Err((CallErrorCode::BadResponse, m)),
                Ok(Err(e)) => Err((CallErrorCode::Transport, e.to_string())),
                Ok(Ok(resp)) if !resp.ok => Err((
                    CallErrorCode::from_endpoint(resp.code.as_deref()),
                    resp.error
                        .unwrap_or_else(|| "endpoint reported failure".to_string()),
                )),
                Ok(Ok(resp)) if resp.id.is_some_and(|id| id != request.id) => Err((
                    CallErrorCode::BadResponse,
                    format!("response id {:?} does not match request {}", resp.id, request.id),
                )),
                Ok(Ok(resp)) => Ok(resp.result),
            };
        let latency_ms = start.elapsed().as_millis() as u64;
        guard.disarm();

        let now = self.clock.now();
        let mut state = self.lock_state();
        match outcome {
            Ok(result) => {
                let before = state.breaker_mut(tool).state;
                let circuit = state.breaker_mut(tool).record_success();
                if before != BreakerState::Closed {
                    tracing::info!(tool = %tool, from = %before, "circuit closed");
                }
                if let Some(key) = key {
                    let ttl = self.config.cache.ttl;
                    state.cache.retain(|_, e| e.is_fresh(now, ttl));
                    state.cache.insert(
                        key,
                        CacheEntry {
                            stored_at: now,
                            result: result.clone(),
                        },
                    );
                }
                self.persist(&state);
                Ok(CallSuccess {
                    tool: tool.to_string(),
                    server_id: route.server_id.clone(),
                    result,
                    latency_ms,
                    from_cache: false,
                    circuit,
                })
            }
            Err((code, message)) => {
                let before = state.breaker_mut(tool).state;
                let circuit = state.breaker_mut(tool).record_failure(now, &self.config.breaker);
                if before != BreakerState::Open && circuit == BreakerState::Open {
                    tracing::warn!(tool = %tool, code = %code, "circuit opened");
                }
                self.persist(&state);
                Err(CallFailure {
                    tool: tool.to_string(),
                    server_id: Some(route.server_id.clone()),
                    code,
                    message,
                    circuit: Some(circuit),
                    latency_ms,
                })
            }
        }
    }

    /// 健康检查：对 server 发一次 list_tools，不经过缓存与熔断
    pub async fn list_tools(&self, server_id: &str) -> CallResult {
        let Some(transport) = self.servers.get(server_id) else {
            return Err(CallFailure {
                tool: "list_tools".to_string(),
                server_id: Some(server_id.to_string()),
                code: CallErrorCode::Transport,
                message: format!("unknown server: {server_id}"),
                circuit: None,
                latency_ms: 0,
            });
        };
        let timeout = self.config.request_timeout;
        let request = RpcRequest::list_tools(self.next_id.fetch_add(1, Ordering::Relaxed));
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, transport.request(&request, timeout)).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        let failure = |code: CallErrorCode, message: String| CallFailure {
            tool: "list_tools".to_string(),
            server_id: Some(server_id.to_string()),
            code,
            message,
            circuit: None,
            latency_ms,
        };
        match outcome {
            Err(_) | Ok(Err(TransportError::Timeout(_))) => {
                Err(failure(CallErrorCode::Timeout, "health check timed out".to_string()))
            }
            Ok(Err(e)) => Err(failure(CallErrorCode::Transport, e.to_string())),
            Ok(Ok(resp)) if !resp.ok => Err(failure(
                CallErrorCode::from_endpoint(resp.code.as_deref()),
                resp.error.unwrap_or_default(),
            )),
            Ok(Ok(resp)) => Ok(CallSuccess {
                tool: "list_tools".to_string(),
                server_id: server_id.to_string(),
                result: resp.result,
                latency_ms,
                from_cache: false,
                circuit: BreakerState::Closed,
            }),
        }
    }

    /// 所有 server 的 id，按字典序
    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.servers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn breaker_state(&self, tool: &str) -> BreakerState {
        self.lock_state()
            .breakers
            .get(tool)
            .map(|b| b.state)
            .unwrap_or_default()
    }

    /// 当前状态副本
    pub fn state(&self) -> ClientState {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, state: &ClientState) {
        if let Err(e) = self.persistence.save(state) {
            tracing::warn!(error = %e, "failed to persist client state");
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

fn audit(tool: &str, args_preview: &str, result: &CallResult) {
    let audit = match result {
        Ok(s) => serde_json::json!({
            "event": "tool_audit",
            "tool": tool,
            "server": s.server_id,
            "ok": true,
            "outcome": if s.from_cache { "cache" } else { "ok" },
            "duration_ms": s.latency_ms,
            "circuit": s.circuit,
            "args_preview": args_preview,
        }),
        Err(f) => serde_json::json!({
            "event": "tool_audit",
            "tool": tool,
            "server": f.server_id,
            "ok": false,
            "outcome": f.code,
            "duration_ms": f.latency_ms,
            "circuit": f.circuit,
            "error": f.message,
            "args_preview": args_preview,
        }),
    };
    tracing::info!(audit = %audit.to_string(), "tool");
}
