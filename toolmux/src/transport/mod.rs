//! Transport Adapter
//!
//! Routes JSON-RPC methods onto the dispatcher and registry. Framing lives in
//! [`stdio`] and, with the `server` feature, [`http`].

#[cfg(feature = "server")]
pub mod http;
pub mod stdio;

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ToolConfig;
use crate::dispatcher::{Dispatcher, InstructionOptions};
use crate::loader::{ConfiguredService, ModuleLoader};
use crate::rpc::{RpcRequest, RpcResponse, ToolCallArgs, EXECUTION_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

const METHOD_PREFIX: &str = "Server.";

/// Arguments of the `RegisterTool` method.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterToolArgs {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(flatten)]
    pub tool: ToolConfig,
}

/// JSON-RPC front of a [`Dispatcher`], shared by every transport.
#[derive(Clone)]
pub struct RpcService {
    dispatcher: Arc<Dispatcher>,
    registration: Option<Arc<ModuleLoader>>,
}

impl RpcService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            registration: None,
        }
    }

    /// Enable the `RegisterTool` method, resolving modules with `loader`.
    pub fn with_remote_registration(mut self, loader: Arc<ModuleLoader>) -> Self {
        self.registration = Some(loader);
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        let method = request
            .method
            .strip_prefix(METHOD_PREFIX)
            .unwrap_or(&request.method);
        debug!("Handling RPC method {}", method);

        let response = match method {
            "ProcessInstruction" => self.process_instruction(request.params).await,
            "ExecutePlan" => self.execute_plan(request.params).await,
            "CallTool" => self.call_tool(request.params).await,
            "ListTools" => self.list_tools(request.params),
            "ListServices" => RpcResponse::success(json!(self.dispatcher.registry().list_services())),
            "RegisterTool" => self.register_tool(request.params).await,
            _ => RpcResponse::failure(METHOD_NOT_FOUND, format!("method not found: {}", request.method)),
        };
        response.with_id(id)
    }

    /// Handle a request body. A body that is not a JSON-RPC request is taken as
    /// a plain-text instruction.
    pub async fn handle_body(&self, body: &str) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(body) {
            Ok(request) if !request.method.is_empty() => self.handle(request).await,
            _ => {
                debug!("Request body is not JSON-RPC; treating it as an instruction");
                self.dispatcher
                    .process_instruction(body.trim(), InstructionOptions::default())
                    .await
            }
        }
    }

    async fn process_instruction(&self, params: Value) -> RpcResponse {
        let args = positional(params);
        let Some(Value::String(instruction)) = args.first() else {
            return invalid_params("ProcessInstruction expects [instruction] or [instruction, directive]");
        };
        let options = match args.get(1) {
            None | Some(Value::Null) => InstructionOptions::default(),
            Some(Value::String(directive)) => InstructionOptions::with_directive(directive.clone()),
            Some(_) => return invalid_params("directive must be a string"),
        };
        self.dispatcher.process_instruction(instruction, options).await
    }

    async fn execute_plan(&self, params: Value) -> RpcResponse {
        match positional(params).into_iter().next() {
            None | Some(Value::Null) => self.dispatcher.execute_plan("").await,
            Some(Value::String(text)) => self.dispatcher.execute_plan(&text).await,
            Some(plan @ (Value::Array(_) | Value::Object(_))) => self.dispatcher.execute_plan_value(plan).await,
            Some(_) => invalid_params("ExecutePlan expects plan text, a plan array or a plan object"),
        }
    }

    async fn call_tool(&self, params: Value) -> RpcResponse {
        let args: ToolCallArgs = match first_object(params).and_then(|v| serde_json::from_value(v).ok()) {
            Some(args) => args,
            None => return invalid_params("CallTool expects {tool_name, parameters}"),
        };
        self.dispatcher.call_tool(&args.tool_name, args.parameters).await
    }

    fn list_tools(&self, params: Value) -> RpcResponse {
        let registry = self.dispatcher.registry();
        match positional(params).into_iter().next() {
            None | Some(Value::Null) => RpcResponse::success(json!(registry.list_tools())),
            Some(Value::String(service)) => RpcResponse::success(json!(registry.list_tools_for_service(&service))),
            Some(_) => invalid_params("ListTools expects [] or [service]"),
        }
    }

    async fn register_tool(&self, params: Value) -> RpcResponse {
        let Some(loader) = self.registration.clone() else {
            warn!("Rejected RegisterTool: remote registration is disabled");
            return RpcResponse::failure(METHOD_NOT_FOUND, "method not found: RegisterTool (remote registration is disabled)");
        };
        let args: RegisterToolArgs = match first_object(params).map(serde_json::from_value::<RegisterToolArgs>) {
            Some(Ok(args)) => args,
            Some(Err(e)) => return invalid_params(&format!("invalid RegisterTool arguments: {e}")),
            None => return invalid_params("RegisterTool expects a tool definition object"),
        };

        let tool = args.tool;
        let resolved = tokio::task::spawn_blocking(move || {
            let loaded = loader.resolve_tool(&tool, Path::new("."));
            (tool, loaded)
        })
        .await;
        let (tool, loaded) = match resolved {
            Ok((tool, Ok(loaded))) => (tool, loaded),
            Ok((_, Err(e))) => return RpcResponse::failure(EXECUTION_ERROR, e.to_string()),
            Err(e) => return RpcResponse::failure(EXECUTION_ERROR, format!("registration task failed: {e}")),
        };

        let registry = self.dispatcher.registry();
        let service = args.service.unwrap_or_default();
        if service.is_empty() {
            registry.register_service_tool("", &loaded.name, &loaded.description, loaded.schema, loaded.handler);
        } else {
            registry.register_service(Arc::new(ConfiguredService::new(&service, vec![loaded])));
        }
        info!("Registered tool {} over RPC", tool.name);
        RpcResponse::success(json!({
            "status": "success",
            "message": format!("Tool {} registered", tool.name),
            "service": service,
        }))
    }
}

/// Positional parameters; a bare value counts as a single argument.
fn positional(params: Value) -> Vec<Value> {
    match params {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn first_object(params: Value) -> Option<Value> {
    match positional(params).into_iter().next() {
        Some(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn invalid_params(message: &str) -> RpcResponse {
    RpcResponse::failure(INVALID_PARAMS, message)
}
