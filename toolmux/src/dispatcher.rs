//! Plan Dispatcher
//!
//! Turns a free-text instruction into tool invocations:
//! `Classifying -> (MetaAnswered | Planning -> Executing -> (Succeeded | Failed))`.
//! Every outcome, including failures, is returned as an [`RpcResponse`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::directive;
use crate::error::{DispatchError, ModelError};
use crate::handler::{invoke_with_deadline, Params, ToolContext};
use crate::intent;
use crate::model::{FunctionCall, ModelClient, ModelReply, ModelRequest};
use crate::plan::{self, PlanAction, PlanStep};
use crate::registry::ToolRegistry;
use crate::rpc::RpcResponse;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Ceiling for each tool invocation.
    pub tool_timeout: Duration,
    /// Ceiling for each model call.
    pub model_timeout: Duration,
    /// Check parameters against the tool's input schema before invoking it.
    pub validate_parameters: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            validate_parameters: false,
        }
    }
}

/// Per-call options for [`Dispatcher::process_instruction`].
#[derive(Debug, Clone, Default)]
pub struct InstructionOptions {
    /// Replaces the rendered directive for this call only.
    pub directive: Option<String>,
}

impl InstructionOptions {
    pub fn with_directive(directive: impl Into<String>) -> Self {
        Self {
            directive: Some(directive.into()),
        }
    }
}

/// How an instruction will be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    ListServices,
    ListTools { service: Option<String> },
    Plan,
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    model: Arc<dyn ModelClient>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, model: Arc<dyn ModelClient>) -> Self {
        Self {
            registry,
            model,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn classify(&self, instruction: &str) -> Classification {
        if intent::is_list_services_query(instruction) {
            return Classification::ListServices;
        }
        if intent::is_list_tools_query(instruction) {
            let services = self.registry.list_services();
            let service = intent::extract_service_name(instruction, services.iter().map(String::as_str));
            return Classification::ListTools { service };
        }
        Classification::Plan
    }

    /// Answer a meta-query directly, or plan with the model and execute the plan.
    pub async fn process_instruction(&self, instruction: &str, options: InstructionOptions) -> RpcResponse {
        debug!("Processing instruction: {}", instruction);
        let result = self.try_process_instruction(instruction, options).await;
        self.respond("ProcessInstruction", result)
    }

    /// Execute plan text produced by the model or supplied by a caller.
    pub async fn execute_plan(&self, plan_text: &str) -> RpcResponse {
        debug!("Executing plan: {}", plan_text);
        let result = match plan::parse(plan_text) {
            Ok(steps) => self.run_steps(steps).await,
            Err(e) => Err(e),
        };
        self.respond("ExecutePlan", result)
    }

    /// Execute an already-decoded plan (a step object or an array of them).
    pub async fn execute_plan_value(&self, plan: Value) -> RpcResponse {
        debug!("Executing plan: {}", plan);
        let result = match plan::steps(plan) {
            Ok(steps) => self.run_steps(steps).await,
            Err(e) => Err(e),
        };
        self.respond("ExecutePlan", result)
    }

    /// Invoke one tool by name, bypassing planning.
    pub async fn call_tool(&self, tool_name: &str, parameters: Params) -> RpcResponse {
        debug!("Calling tool {} directly", tool_name);
        let result = self.invoke(tool_name, parameters).await.map(|output| {
            json!({
                "status": "success",
                "message": format!("Tool {} executed successfully", tool_name),
                "output": output,
            })
        });
        self.respond("CallTool", result)
    }

    async fn try_process_instruction(
        &self,
        instruction: &str,
        options: InstructionOptions,
    ) -> Result<Value, DispatchError> {
        match self.classify(instruction) {
            Classification::ListServices => Ok(json!(self.registry.list_services())),
            Classification::ListTools { service: Some(service) } => {
                Ok(json!(self.registry.list_tools_for_service(&service)))
            }
            Classification::ListTools { service: None } => Ok(json!(self.registry.list_tools())),
            Classification::Plan => {
                let reply = self.plan(instruction, options).await?;
                match reply.function_call {
                    Some(call) => self.run_function_call(call).await,
                    None => {
                        debug!("Generated plan: {}", reply.text);
                        self.run_steps(plan::parse(&reply.text)?).await
                    }
                }
            }
        }
    }

    async fn plan(&self, instruction: &str, options: InstructionOptions) -> Result<ModelReply, DispatchError> {
        let directive = options
            .directive
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| directive::render(&self.registry));
        let request = ModelRequest {
            instruction: instruction.to_string(),
            tools: self.registry.tool_definitions(),
            directive,
        };

        let timeout = self.config.model_timeout;
        match tokio::time::timeout(timeout, self.model.generate(request)).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(ModelError::Timeout(timeout).into()),
        }
    }

    async fn run_function_call(&self, call: FunctionCall) -> Result<Value, DispatchError> {
        debug!("Model requested function {} with arguments {}", call.name, call.arguments);
        let arguments: Value = serde_json::from_str(&call.arguments).map_err(|e| {
            DispatchError::Parse(format!("invalid arguments for tool {}: {}", call.name, e))
        })?;
        let parameters = match arguments {
            Value::Object(map) => map,
            Value::Null => Params::new(),
            _ => {
                return Err(DispatchError::Parse(format!(
                    "arguments for tool {} are not a JSON object",
                    call.name
                )))
            }
        };
        self.invoke(&call.name, parameters).await?;
        Ok(Value::String(format!("Tool {} executed successfully", call.name)))
    }

    async fn run_steps(&self, steps: Vec<PlanStep>) -> Result<Value, DispatchError> {
        let mut outputs = Vec::with_capacity(steps.len());
        for step in &steps {
            let PlanAction { action, parameters } = PlanAction::from_step(step)?;
            debug!("Executing action {} with parameters {:?}", action, parameters);
            let output = self.invoke(&action, parameters).await?;
            outputs.push(json!({ "action": action, "output": output }));
        }
        info!("Plan executed successfully ({} actions)", outputs.len());
        Ok(json!({
            "status": "success",
            "message": "Plan executed successfully",
            "outputs": outputs,
        }))
    }

    async fn invoke(&self, action: &str, parameters: Params) -> Result<Value, DispatchError> {
        let tool = self
            .registry
            .get(action)
            .ok_or_else(|| DispatchError::UnknownAction(action.to_string()))?;

        if self.config.validate_parameters {
            tool.validate(&parameters)
                .map_err(|e| DispatchError::InvalidParams(format!("tool {}: {}", action, e)))?;
        }

        let ctx = ToolContext::new(action, self.config.tool_timeout);
        debug!(trace_id = %ctx.trace_id, "Invoking tool {}", action);
        invoke_with_deadline(&tool.handler, ctx, parameters)
            .await
            .map_err(|source| DispatchError::Execution {
                action: action.to_string(),
                source,
            })
    }

    fn respond(&self, operation: &str, result: Result<Value, DispatchError>) -> RpcResponse {
        if let Err(e) = &result {
            error!("[{}] {}", operation, e);
        }
        RpcResponse::from_result(result)
    }
}
