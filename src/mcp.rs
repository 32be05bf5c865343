// Swarm Gate - MCP Server (JSON-RPC 2.0)
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Protocol dispatcher shared by the HTTP and stdio transports.
// Discovery (tools/list) runs the gate and binds the result to the
// session; invocation (tools/call) only accepts tools from that binding.
// Every failure leaves here as a well-formed JSON-RPC response.

use crate::auth::Principal;
use crate::budget::BudgetError;
use crate::catalog::{SchemaViolation, ToolSet};
use crate::classify::{ClassifyError, IntentClassifier};
use crate::docker::DockerError;
use crate::filter::FilterContext;
use crate::gate::GateController;
use crate::ops::{OpError, Operation, ToolExecutor};
use crate::redact::param_summary;
use crate::session::{SessionBindings, STDIO_SESSION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "swarm-gate";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const NO_MATCH_WARNING: &str = "No task types detected from query and fallback disabled";

/// Longest query echoed into log lines.
const LOG_QUERY_CHARS: usize = 100;

// ============================================================================
// JSON-RPC ENVELOPE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Absent or null marks a notification.
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(Self::PARSE_ERROR, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, detail)
    }

    pub fn method_not_found(detail: impl Into<String>) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, detail)
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, detail)
    }
}

fn violation_data(v: &SchemaViolation) -> Value {
    json!({ "path": v.instance_path, "schema_path": v.schema_path })
}

impl From<SchemaViolation> for RpcError {
    fn from(v: SchemaViolation) -> Self {
        Self::invalid_params(format!("Invalid parameters: {}", v.message)).with_data(violation_data(&v))
    }
}

impl From<OpError> for RpcError {
    fn from(e: OpError) -> Self {
        match e {
            OpError::InvalidArguments(_) => Self::invalid_params(e.to_string()),
            OpError::Unsupported(_) => Self::method_not_found(e.to_string()),
            OpError::Docker(ref inner) => {
                let mut data = json!({ "error_type": docker_error_type(inner) });
                if let Some(status) = inner.status_code() {
                    data["status_code"] = json!(status);
                }
                Self::internal(e.to_string()).with_data(data)
            }
            OpError::PingFailed | OpError::Encode(_) => Self::internal(format!("Tool execution failed: {e}")),
        }
    }
}

fn docker_error_type(e: &DockerError) -> &'static str {
    match e {
        DockerError::Transport(_) => "transport",
        DockerError::NotFound(_) => "not_found",
        DockerError::Conflict(_) => "conflict",
        DockerError::Api { .. } => "api",
        DockerError::Decode(_) => "decode",
        DockerError::Unsupported(_) => "unsupported",
        DockerError::Config(_) => "config",
    }
}

impl From<BudgetError> for RpcError {
    fn from(e: BudgetError) -> Self {
        let data = match &e {
            BudgetError::HardLimit { size, limit } => json!({ "context_size": size, "limit": limit }),
        };
        Self::internal(e.to_string()).with_data(data)
    }
}

impl From<ClassifyError> for RpcError {
    fn from(e: ClassifyError) -> Self {
        Self::internal(format!("Intent classification failed: {e}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(error),
            id,
        }
    }
}

// ============================================================================
// REQUEST METADATA - filled in by the transport
// ============================================================================

#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
    pub session_id: String,
    pub principal: Principal,
    /// Legacy X-Task-Type header; beats `params.task_type`.
    pub task_type_header: Option<String>,
}

impl RequestMeta {
    pub fn new(session_id: impl Into<String>, principal: Principal) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            principal,
            task_type_header: None,
        }
    }

    /// Local trusted caller on stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(STDIO_SESSION, Principal::local())
    }
}

// ============================================================================
// SERVER
// ============================================================================

pub struct McpServer {
    gate: GateController,
    classifier: Option<Box<dyn IntentClassifier>>,
    executor: ToolExecutor,
    sessions: SessionBindings,
    enforce_output_schema: bool,
}

impl McpServer {
    pub fn new(
        gate: GateController,
        classifier: Option<Box<dyn IntentClassifier>>,
        executor: ToolExecutor,
        enforce_output_schema: bool,
    ) -> Self {
        Self {
            gate,
            classifier,
            executor,
            sessions: SessionBindings::new(),
            enforce_output_schema,
        }
    }

    pub fn gate(&self) -> &GateController {
        &self.gate
    }

    pub fn sessions(&self) -> &SessionBindings {
        &self.sessions
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn tool_count(&self) -> usize {
        self.gate.catalog().len()
    }

    /// Raw request body in, response out. `None` means "send nothing".
    pub async fn handle_raw(&self, raw: &[u8], meta: &RequestMeta) -> Option<RpcResponse> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => self.handle_value(value, meta).await,
            Err(e) => {
                log::warn!("[{}] JSON parse error: {}", meta.request_id, e);
                Some(RpcResponse::failure(Value::Null, RpcError::parse_error(e)))
            }
        }
    }

    pub async fn handle_value(&self, value: Value, meta: &RequestMeta) -> Option<RpcResponse> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        if value.is_array() {
            return Some(RpcResponse::failure(
                Value::Null,
                RpcError::invalid_request("Batch requests are not supported"),
            ));
        }
        // An object without an id is a notification even when malformed.
        let notification = value
            .as_object()
            .is_some_and(|o| matches!(o.get("id"), None | Some(Value::Null)));
        let envelope_error = |error: RpcError| {
            if notification {
                log::debug!("[{}] dropping malformed notification: {}", meta.request_id, error.message);
                None
            } else {
                Some(RpcResponse::failure(id.clone(), error))
            }
        };

        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => return envelope_error(RpcError::invalid_request(format!("Invalid Request: {e}"))),
        };
        // Missing jsonrpc defaults to "2.0"; only an explicit other value is rejected.
        if request.jsonrpc.as_deref().is_some_and(|v| v != "2.0") {
            return envelope_error(RpcError::invalid_request("Invalid Request: jsonrpc must be \"2.0\""));
        }
        self.handle(request, meta).await
    }

    /// Dispatch one request. Notifications run but get no response.
    pub async fn handle(&self, request: RpcRequest, meta: &RequestMeta) -> Option<RpcResponse> {
        log::info!(
            "[{}] {}{} session={}",
            meta.request_id,
            request.method,
            if request.is_notification() { " (notification)" } else { "" },
            meta.session_id
        );
        let outcome = self.dispatch(&request.method, request.params.as_ref(), meta).await;

        match request.id {
            None => {
                if let Err(e) = outcome {
                    log::debug!("[{}] notification {} failed: {}", meta.request_id, request.method, e.message);
                }
                None
            }
            Some(id) => Some(match outcome {
                Ok(result) => RpcResponse::success(id, result),
                Err(error) => RpcResponse::failure(id, error),
            }),
        }
    }

    async fn dispatch(&self, method: &str, params: Option<&Value>, meta: &RequestMeta) -> Result<Value, RpcError> {
        let empty = Map::new();
        let params = match params {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => return Err(RpcError::invalid_params("params must be an object")),
        };

        match method {
            "initialize" => Ok(self.initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => self.tools_list(params, meta),
            "tools/call" => self.tools_call(params, meta).await,
            "prompts/list" => Ok(self.executor.guide().prompts_list()),
            "prompts/get" => self.prompts_get(params),
            m if m.starts_with("notifications/") => Ok(json!({})),
            other => Err(RpcError::method_not_found(format!("Method not found: {other}"))),
        }
    }

    fn initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "gating": true,
                    "context_size_enforcement": true,
                    "task_type_filtering": true,
                },
                "prompts": { "listChanged": false },
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION,
            }
        })
    }

    // ========================================================================
    // tools/list
    // ========================================================================

    fn tools_list(&self, params: &Map<String, Value>, meta: &RequestMeta) -> Result<Value, RpcError> {
        let policy = self.gate.policy();
        let mut ctx = FilterContext::new(meta.request_id.clone());
        ctx.session_id = Some(meta.session_id.clone());
        ctx.task_type = meta
            .task_type_header
            .clone()
            .or(optional_str(params, "task_type")?);
        ctx.query = optional_str(params, "query")?.filter(|q| !q.is_empty());

        let mut classification_method = if ctx.task_type.is_some() { "explicit" } else { "none" };
        if let Some(query) = &ctx.query {
            match &self.classifier {
                Some(classifier) if policy.classification_enabled => {
                    let detected = classifier.classify(query)?;
                    log::info!(
                        "[{}] intent {:?} -> {:?} (precedence {:?})",
                        meta.request_id,
                        clip(query),
                        detected,
                        policy.precedence
                    );
                    ctx.detected_task_types = Some(detected);
                    classification_method = "intent";
                }
                _ => {
                    log::info!(
                        "[{}] intent classification disabled, query {:?} ignored",
                        meta.request_id,
                        clip(query)
                    );
                    classification_method = "none";
                }
            }
        }

        if ctx.is_no_match() && policy.restrictive() {
            log::info!(
                "[{}] strict no-match: empty tool set for session {}",
                meta.request_id,
                meta.session_id
            );
            self.sessions.bind(&meta.session_id, ToolSet::new());
            return Ok(json!({
                "tools": [],
                "_metadata": {
                    "context_size": 0,
                    "filters_applied": [],
                    "classification_method": classification_method,
                    "query": ctx.query,
                    "detected_task_types": [],
                    "warning": NO_MATCH_WARNING,
                }
            }));
        }

        let outcome = self.gate.get_available_tools(&ctx);
        let mut tools = outcome.tools;
        let mut filters_applied = outcome.filters_applied;

        if !meta.principal.is_admin() {
            let before = tools.len();
            tools.retain(|_, tool| tool.authorization().permits(&meta.principal.scopes));
            if tools.len() != before {
                filters_applied.push("ScopeFilter");
            }
        }

        let context_size = self.gate.get_context_size(&tools)?;
        let descriptors: Vec<Value> = tools.values().map(|t| t.descriptor()).collect();
        self.sessions.bind(&meta.session_id, tools);

        log::info!(
            "[{}] tools/list: {} tools, context_size={}, filters={:?}, method={}",
            meta.request_id,
            descriptors.len(),
            context_size,
            filters_applied,
            classification_method
        );

        let mut metadata = json!({
            "context_size": context_size,
            "filters_applied": filters_applied,
            "classification_method": classification_method,
        });
        if let Some(query) = &ctx.query {
            metadata["query"] = json!(query);
            metadata["detected_task_types"] = json!(ctx.detected_task_types.clone().unwrap_or_default());
        }
        Ok(json!({ "tools": descriptors, "_metadata": metadata }))
    }

    // ========================================================================
    // tools/call
    // ========================================================================

    async fn tools_call(&self, params: &Map<String, Value>, meta: &RequestMeta) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("Missing 'name' parameter"))?;
        let args = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(v @ Value::Object(_)) => v.clone(),
            Some(_) => return Err(RpcError::invalid_params("'arguments' must be an object")),
        };

        let bound = match self.sessions.lookup(&meta.session_id) {
            Some(binding) => {
                log::debug!(
                    "[{}] session {} bound to {} tools at {}",
                    meta.request_id,
                    meta.session_id,
                    binding.tools.len(),
                    binding.bound_at.to_rfc3339()
                );
                binding.tools
            }
            None => {
                log::warn!(
                    "[{}] no tools/list seen for session {}, falling back to the full catalog",
                    meta.request_id,
                    meta.session_id
                );
                Arc::new(self.gate.catalog().get_all())
            }
        };

        let tool = match bound.get(name) {
            Some(tool) => Arc::clone(tool),
            None => {
                log::warn!("[{}] tool '{}' blocked by session gating", meta.request_id, name);
                return Err(RpcError::method_not_found(format!(
                    "Tool '{name}' not available or blocked by session gating"
                ))
                .with_data(json!({ "available_tools": bound.keys().collect::<Vec<_>>() })));
            }
        };

        if !tool.authorization().permits(&meta.principal.scopes) {
            log::warn!(
                "[{}] tool '{}' denied: scopes {:?} do not match {:?}",
                meta.request_id,
                name,
                meta.principal.scopes,
                tool.authorization().set()
            );
            return Err(RpcError::method_not_found("Insufficient permissions")
                .with_data(json!({ "required_scopes": tool.authorization().set() })));
        }

        if let Err(violation) = tool.validate_arguments(&args) {
            log::warn!("[{}] input validation failed for '{}': {}", meta.request_id, name, violation);
            return Err(violation.into());
        }

        let op = Operation::from_tool_name(name).ok_or_else(|| OpError::Unsupported(name.to_string()))?;
        let deadline = self.executor.timeout_for(op);
        log::info!(
            "[{}] tools/call {} ({}) {}",
            meta.request_id,
            name,
            op.class().as_str(),
            param_summary(&args)
        );

        let result = match tokio::time::timeout(deadline, self.executor.execute(op, &args)).await {
            Err(_) => {
                let secs = deadline.as_secs_f64();
                log::error!("[{}] tool '{}' timed out after {}s", meta.request_id, name, secs);
                return Err(RpcError::internal(format!("Tool execution timeout after {secs}s"))
                    .with_data(json!({ "timeout": secs, "operation_type": op.class().as_str() })));
            }
            Ok(Err(e)) => {
                log::error!("[{}] tool '{}' failed: {}", meta.request_id, name, e);
                return Err(e.into());
            }
            Ok(Ok(value)) => value,
        };

        if let Err(violation) = tool.validate_output(&result) {
            log::error!("[{}] output validation failed for '{}': {}", meta.request_id, name, violation);
            if self.enforce_output_schema {
                return Err(RpcError::internal(format!(
                    "Output validation failed for '{name}': {}",
                    violation.message
                ))
                .with_data(violation_data(&violation)));
            }
        }

        let text = serde_json::to_string_pretty(&result).map_err(OpError::from)?;
        log::info!("[{}] tools/call {} ok", meta.request_id, name);
        Ok(json!({ "content": [{ "type": "text", "text": text }] }))
    }

    fn prompts_get(&self, params: &Map<String, Value>) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("Missing 'name' parameter"))?;
        self.executor
            .guide()
            .prompt(name)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown prompt name: {name}")))
    }
}

/// Optional string param; any other JSON type is invalid.
fn optional_str(params: &Map<String, Value>, key: &str) -> Result<Option<String>, RpcError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(RpcError::invalid_params(format!("'{key}' must be a string"))),
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() > LOG_QUERY_CHARS {
        let head: String = text.chars().take(LOG_QUERY_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

// ============================================================================
// STDIO TRANSPORT
// ============================================================================

/// Line-delimited JSON-RPC on stdin/stdout until EOF.
pub async fn run_stdio(server: Arc<McpServer>) -> anyhow::Result<()> {
    log::info!("Starting {} v{} on stdio", SERVER_NAME, SERVER_VERSION);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let meta = RequestMeta::stdio();
        if let Some(response) = server.handle_raw(line.as_bytes(), &meta).await {
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            stdout.write_all(&out).await?;
            stdout.flush().await?;
        }
    }
    log::info!("stdin closed, shutting down");
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::budget::{CharRatioCounter, ContextLimits};
    use crate::catalog::fixtures::{catalog, def};
    use crate::catalog::Catalog;
    use crate::classify::KeywordClassifier;
    use crate::config::{FilterConfig, GatingPolicy, Timeouts};
    use crate::docker::fake::FakeDocker;
    use crate::meta::Guide;
    use indexmap::IndexMap;
    use std::time::Duration;

    pub(crate) fn docker_catalog() -> Catalog {
        // Object schema on purpose: the fake engine returns an array.
        let list = def("list-containers", &["container-ops"], 5);
        let mut remove = def("remove-container", &["container-ops"], 1);
        remove.required_scopes = Some(vec!["container-admin".into()]);
        remove.request_schema = Some(json!({
            "type": "object",
            "properties": {"id": {"type": "string"}, "force": {"type": "boolean"}},
            "required": ["id"]
        }));
        let mut networks = def("list-networks", &["network-ops"], 3);
        networks.response_schema = json!({"type": "array"});
        catalog(vec![list, remove, networks, def("discover-tools", &["meta-ops"], 0)])
    }

    pub(crate) fn docker_config() -> FilterConfig {
        let mut config = FilterConfig::default();
        let lists = &mut config.task_type_allowlists;
        lists.insert("container-ops".into(), vec!["list-containers".into(), "remove-container".into()]);
        lists.insert("network-ops".into(), vec!["list-networks".into()]);
        lists.insert("meta-ops".into(), vec!["discover-tools".into()]);
        config
    }

    pub(crate) struct Harness {
        pub policy: GatingPolicy,
        pub timeouts: Timeouts,
        pub enforce_output_schema: bool,
        pub docker: Arc<FakeDocker>,
    }

    impl Default for Harness {
        fn default() -> Self {
            Self {
                policy: GatingPolicy::default(),
                timeouts: Timeouts::default(),
                enforce_output_schema: false,
                docker: Arc::new(FakeDocker::default()),
            }
        }
    }

    impl Harness {
        pub fn build(self) -> McpServer {
            let catalog = Arc::new(docker_catalog());
            let config = docker_config();
            let mut keywords = IndexMap::new();
            keywords.insert("container-ops".to_string(), vec!["container".to_string(), "containers".to_string()]);
            keywords.insert("network-ops".to_string(), vec!["network".to_string()]);
            let classifier = KeywordClassifier::new(&keywords).unwrap();
            let guide = Guide::new(Arc::clone(&catalog), config.clone(), self.policy.classification_enabled);
            let gate = GateController::new(
                catalog,
                config,
                self.policy,
                Box::new(CharRatioCounter),
                ContextLimits::default(),
            );
            let executor = ToolExecutor::new(self.docker, guide, self.timeouts);
            McpServer::new(gate, Some(Box::new(classifier)), executor, self.enforce_output_schema)
        }
    }

    pub(crate) fn server() -> McpServer {
        Harness::default().build()
    }

    fn admin(session: &str) -> RequestMeta {
        RequestMeta::new(session, Principal::local())
    }

    fn scoped(session: &str, scopes: &[&str]) -> RequestMeta {
        let principal = Principal {
            credential: "scoped-token".into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        };
        RequestMeta::new(session, principal)
    }

    async fn call(server: &McpServer, meta: &RequestMeta, method: &str, params: Value) -> RpcResponse {
        let request = RpcRequest {
            jsonrpc: Some("2.0".into()),
            method: method.into(),
            params: Some(params),
            id: Some(json!(1)),
        };
        server.handle(request, meta).await.unwrap()
    }

    fn names(response: &RpcResponse) -> Vec<String> {
        response.result.as_ref().unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect()
    }

    fn error_code(response: &RpcResponse) -> i64 {
        response.error.as_ref().map(|e| e.code).unwrap_or(0)
    }

    #[tokio::test]
    async fn initialize_advertises_gating() {
        let res = call(&server(), &admin("s"), "initialize", json!({})).await;
        let result = res.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["capabilities"]["tools"]["gating"], true);
        assert_eq!(result["capabilities"]["prompts"]["listChanged"], false);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn default_listing_hides_meta_ops() {
        let server = server();
        let res = call(&server, &admin("s"), "tools/list", json!({})).await;
        assert_eq!(names(&res), vec!["list-containers", "remove-container", "list-networks"]);
        let metadata = &res.result.as_ref().unwrap()["_metadata"];
        assert_eq!(metadata["classification_method"], "none");
        assert_eq!(metadata["filters_applied"], json!(["TaskTypeFilter"]));
        assert!(metadata["context_size"].as_u64().unwrap() > 0);

        let meta = call(&server, &admin("s"), "tools/list", json!({"task_type": "meta-ops"})).await;
        assert_eq!(names(&meta), vec!["discover-tools"]);
    }

    #[tokio::test]
    async fn descriptors_carry_input_schema() {
        let res = call(&server(), &admin("s"), "tools/list", json!({"task_type": "container-ops"})).await;
        let tools = res.result.unwrap()["tools"].clone();
        assert_eq!(tools[1]["name"], "remove-container");
        assert_eq!(tools[1]["inputSchema"]["required"], json!(["id"]));
        assert_eq!(tools[0]["inputSchema"], json!({"type": "object", "properties": {}, "required": []}));
    }

    #[tokio::test]
    async fn session_round_trip_enforces_last_listing() {
        let server = server();
        let meta = admin("round-trip");
        let listed = call(&server, &meta, "tools/list", json!({"task_type": "network-ops"})).await;
        assert_eq!(names(&listed), vec!["list-networks"]);

        let ok = call(&server, &meta, "tools/call", json!({"name": "list-networks"})).await;
        assert!(ok.error.is_none(), "{:?}", ok.error);
        assert_eq!(ok.result.unwrap()["content"][0]["type"], "text");

        let denied = call(&server, &meta, "tools/call", json!({"name": "list-containers"})).await;
        assert_eq!(error_code(&denied), RpcError::METHOD_NOT_FOUND);
        assert_eq!(denied.error.unwrap().data.unwrap()["available_tools"], json!(["list-networks"]));
    }

    #[tokio::test]
    async fn unbound_session_falls_back_to_catalog() {
        let res = call(&server(), &admin("fresh"), "tools/call", json!({"name": "list-containers"})).await;
        assert!(res.error.is_none());
        let text = res.result.unwrap()["content"][0]["text"].as_str().unwrap().to_string();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["name"], "web");
    }

    #[tokio::test]
    async fn strict_no_match_returns_empty_with_warning() {
        let harness = Harness {
            policy: GatingPolicy { strict: true, ..GatingPolicy::default() },
            ..Harness::default()
        };
        let server = harness.build();
        let meta = admin("strict");
        let res = call(&server, &meta, "tools/list", json!({"query": "zzznonsense"})).await;
        assert!(res.error.is_none());
        let result = res.result.unwrap();
        assert_eq!(result["tools"], json!([]));
        assert_eq!(result["_metadata"]["warning"], NO_MATCH_WARNING);
        assert_eq!(result["_metadata"]["detected_task_types"], json!([]));

        let after = call(&server, &meta, "tools/call", json!({"name": "list-containers"})).await;
        assert_eq!(error_code(&after), RpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn intent_beats_explicit_by_default() {
        let server = server();
        let res = call(
            &server,
            &admin("s"),
            "tools/list",
            json!({"task_type": "container-ops", "query": "show me the network"}),
        )
        .await;
        assert_eq!(names(&res), vec!["list-networks"]);
        let metadata = &res.result.as_ref().unwrap()["_metadata"];
        assert_eq!(metadata["classification_method"], "intent");
        assert_eq!(metadata["detected_task_types"], json!(["network-ops"]));
    }

    #[tokio::test]
    async fn empty_query_keeps_explicit_task_type() {
        let params = json!({"task_type": "network-ops", "query": ""});
        let res = call(&server(), &admin("s"), "tools/list", params.clone()).await;
        assert_eq!(names(&res), vec!["list-networks"]);
        let metadata = &res.result.as_ref().unwrap()["_metadata"];
        assert_eq!(metadata["classification_method"], "explicit");
        assert!(metadata.get("query").is_none());

        let strict = Harness {
            policy: GatingPolicy { strict: true, ..GatingPolicy::default() },
            ..Harness::default()
        }
        .build();
        let res = call(&strict, &admin("s"), "tools/list", params).await;
        assert_eq!(names(&res), vec!["list-networks"]);
        assert!(res.result.unwrap()["_metadata"].get("warning").is_none());
    }

    #[tokio::test]
    async fn ignored_query_reports_no_classification() {
        let server = Harness {
            policy: GatingPolicy { classification_enabled: false, ..GatingPolicy::default() },
            ..Harness::default()
        }
        .build();
        let res = call(
            &server,
            &admin("s"),
            "tools/list",
            json!({"task_type": "container-ops", "query": "show me the network"}),
        )
        .await;
        assert_eq!(names(&res), vec!["list-containers", "remove-container"]);
        let metadata = &res.result.as_ref().unwrap()["_metadata"];
        assert_eq!(metadata["classification_method"], "none");
        assert_eq!(metadata["detected_task_types"], json!([]));
    }

    #[tokio::test]
    async fn header_task_type_beats_param() {
        let server = server();
        let mut meta = admin("s");
        meta.task_type_header = Some("network-ops".into());
        let res = call(&server, &meta, "tools/list", json!({"task_type": "container-ops"})).await;
        assert_eq!(names(&res), vec!["list-networks"]);
    }

    #[tokio::test]
    async fn scope_filter_applies_to_non_admin() {
        let server = server();
        let meta = scoped("scoped", &["container-ops"]);
        let res = call(&server, &meta, "tools/list", json!({})).await;
        assert_eq!(names(&res), vec!["list-containers"]);
        let applied = res.result.unwrap()["_metadata"]["filters_applied"].clone();
        assert_eq!(applied, json!(["TaskTypeFilter", "ScopeFilter"]));
    }

    #[tokio::test]
    async fn scope_rechecked_on_call() {
        let server = server();
        let meta = scoped("no-listing", &["container-ops"]);
        let res = call(&server, &meta, "tools/call", json!({"name": "remove-container", "arguments": {"id": "x"}})).await;
        let error = res.error.unwrap();
        assert_eq!(error.code, RpcError::METHOD_NOT_FOUND);
        assert_eq!(error.message, "Insufficient permissions");
        assert_eq!(error.data.unwrap()["required_scopes"], json!(["container-admin"]));
    }

    #[tokio::test]
    async fn invalid_arguments_report_pointer() {
        let server = server();
        let res = call(&server, &admin("s"), "tools/call", json!({"name": "remove-container", "arguments": {"id": 5}})).await;
        let error = res.error.unwrap();
        assert_eq!(error.code, RpcError::INVALID_PARAMS);
        assert!(error.message.starts_with("Invalid parameters"));
        assert_eq!(error.data.unwrap()["path"], "/id");

        let missing = call(&server, &admin("s"), "tools/call", json!({"arguments": {}})).await;
        assert_eq!(error_code(&missing), RpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn slow_operation_times_out() {
        let harness = Harness {
            timeouts: Timeouts { read: Duration::from_millis(20), ..Timeouts::default() },
            docker: Arc::new(FakeDocker::slow(Duration::from_millis(500))),
            ..Harness::default()
        };
        let res = call(&harness.build(), &admin("s"), "tools/call", json!({"name": "list-networks"})).await;
        let error = res.error.unwrap();
        assert_eq!(error.code, RpcError::INTERNAL_ERROR);
        assert!(error.message.contains("timeout"));
        assert_eq!(error.data.unwrap()["operation_type"], "read");
    }

    #[tokio::test]
    async fn docker_failures_are_internal_errors() {
        let res = call(
            &server(),
            &admin("s"),
            "tools/call",
            json!({"name": "remove-container", "arguments": {"id": "missing"}}),
        )
        .await;
        let error = res.error.unwrap();
        assert_eq!(error.code, RpcError::INTERNAL_ERROR);
        assert_eq!(error.data.unwrap()["status_code"], 404);
    }

    #[tokio::test]
    async fn output_schema_enforced_only_when_configured() {
        let params = json!({"name": "list-containers"});
        let lenient = call(&server(), &admin("s"), "tools/call", params.clone()).await;
        assert!(lenient.error.is_none());

        let strict = Harness { enforce_output_schema: true, ..Harness::default() }.build();
        let res = call(&strict, &admin("s"), "tools/call", params).await;
        let error = res.error.unwrap();
        assert_eq!(error.code, RpcError::INTERNAL_ERROR);
        assert!(error.message.starts_with("Output validation failed for 'list-containers'"));
        assert!(error.data.unwrap().get("schema_path").is_some());
    }

    #[tokio::test]
    async fn prompts_and_ping() {
        let server = server();
        let listed = call(&server, &admin("s"), "prompts/list", json!({})).await;
        assert_eq!(listed.result.unwrap()["prompts"].as_array().unwrap().len(), 3);
        let got = call(&server, &admin("s"), "prompts/get", json!({"name": "discover-tools"})).await;
        assert!(got.result.unwrap()["messages"].is_array());
        let unknown = call(&server, &admin("s"), "prompts/get", json!({"name": "nope"})).await;
        assert_eq!(error_code(&unknown), RpcError::INVALID_PARAMS);
        let ping = call(&server, &admin("s"), "ping", json!({})).await;
        assert_eq!(ping.result, Some(json!({})));
    }

    #[tokio::test]
    async fn envelope_errors() {
        let server = server();
        let meta = admin("s");
        let parse = server.handle_raw(b"{not json", &meta).await.unwrap();
        assert_eq!(error_code(&parse), RpcError::PARSE_ERROR);
        assert_eq!(parse.id, Value::Null);

        let invalid = server.handle_value(json!({"jsonrpc": "2.0", "id": 3}), &meta).await.unwrap();
        assert_eq!(error_code(&invalid), RpcError::INVALID_REQUEST);
        assert_eq!(invalid.id, json!(3));

        let version = server.handle_value(json!({"jsonrpc": "1.0", "method": "ping", "id": 1}), &meta).await.unwrap();
        assert_eq!(error_code(&version), RpcError::INVALID_REQUEST);

        let unknown = call(&server, &meta, "tools/destroy", json!({})).await;
        assert_eq!(error_code(&unknown), RpcError::METHOD_NOT_FOUND);

        let bad_params = server
            .handle_value(json!({"jsonrpc": "2.0", "method": "tools/list", "params": [1], "id": 1}), &meta)
            .await
            .unwrap();
        assert_eq!(error_code(&bad_params), RpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let server = server();
        let meta = admin("s");
        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(server.handle_value(note, &meta).await.is_none());
        let null_id = json!({"jsonrpc": "2.0", "method": "no/such/method", "id": null});
        assert!(server.handle_value(null_id, &meta).await.is_none());

        let bare = json!({"method": "notifications/initialized"});
        assert!(server.handle_value(bare, &meta).await.is_none());
        let wrong_version = json!({"jsonrpc": "1.0", "method": "notifications/initialized"});
        assert!(server.handle_value(wrong_version, &meta).await.is_none());
        let no_method = json!({"jsonrpc": "2.0"});
        assert!(server.handle_value(no_method, &meta).await.is_none());
    }

    #[tokio::test]
    async fn missing_jsonrpc_defaults_to_two() {
        let server = server();
        let res = server
            .handle_value(json!({"method": "ping", "id": 4}), &admin("s"))
            .await
            .unwrap();
        assert!(res.error.is_none(), "{:?}", res.error);
        assert_eq!(res.id, json!(4));
    }

    #[tokio::test]
    async fn response_serialization_omits_absent_fields() {
        let ok = serde_json::to_value(RpcResponse::success(json!(1), json!({}))).unwrap();
        assert!(ok.get("error").is_none());
        let err = serde_json::to_value(RpcResponse::failure(json!(1), RpcError::internal("x"))).unwrap();
        assert!(err.get("result").is_none());
        assert!(err["error"].get("data").is_none());
    }
}
