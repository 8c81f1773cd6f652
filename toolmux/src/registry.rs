//! Tool Registry
//!
//! In-memory catalogue mapping tool names to their metadata and handler, plus the
//! set of registered services. Reads run concurrently from dispatch tasks; writes
//! take the lock's write side and normally only happen during startup.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::handler::{Params, ToolHandler};

/// Something tools can be registered into.
///
/// Services receive a registrar rather than the registry itself, so the tools
/// they add are attributed to them.
pub trait ToolRegistrar {
    fn register_tool(&self, name: &str, description: &str, input_schema: Value, handler: ToolHandler);
}

/// A named grouping of tools that registers its own tools on request.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;
    fn register_tools(&self, registrar: &dyn ToolRegistrar);
}

/// Tool definition exposed to the model catalogue and transport listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A registered tool: metadata, owning service and handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub service_name: String,
    pub handler: ToolHandler,
    validator: Option<Arc<JSONSchema>>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

impl RegisteredTool {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Validate parameters against the tool's input schema. Tools whose schema
    /// could not be compiled accept anything.
    pub fn validate(&self, params: &Params) -> Result<(), ToolError> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let instance = Value::Object(params.clone());
        if let Err(errors) = validator.validate(&instance) {
            let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            return Err(ToolError::InvalidParams(message));
        }
        Ok(())
    }

    fn listing(&self) -> String {
        format!("{}: {}", self.name, self.description)
    }
}

/// Name → tool catalogue plus registered services.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    services: RwLock<HashMap<String, Arc<dyn Service>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool that belongs to `service`. Re-registering a name replaces
    /// the previous entry.
    pub fn register_service_tool(
        &self,
        service: &str,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: ToolHandler,
    ) {
        let validator = match JSONSchema::compile(&input_schema) {
            Ok(compiled) => Some(Arc::new(compiled)),
            Err(e) => {
                warn!("Tool {} has an input schema that does not compile: {}", name, e);
                None
            }
        };
        let tool = RegisteredTool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            service_name: service.to_string(),
            handler,
            validator,
        };

        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.insert(name.to_string(), tool).is_some() {
            warn!("Tool {} re-registered; previous handler replaced", name);
        } else {
            debug!("Registered tool {} (service '{}')", name, service);
        }
    }

    /// Store a service, then let it register its own tools.
    pub fn register_service(&self, service: Arc<dyn Service>) {
        let name = service.name().to_string();
        info!("Registering service: {}", name);
        {
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            services.insert(name.clone(), service.clone());
        }
        let registrar = ServiceRegistrar {
            registry: self,
            service: &name,
        };
        service.register_tools(&registrar);
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn service_count(&self) -> usize {
        self.services.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// All tools as `"name: description"` lines. Order is unspecified.
    pub fn list_tools(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(RegisteredTool::listing)
            .collect()
    }

    pub fn list_services(&self) -> Vec<String> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Tools owned by `service`, matched case-insensitively.
    pub fn list_tools_for_service(&self, service: &str) -> Vec<String> {
        let wanted = service.to_lowercase();
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|tool| tool.service_name.to_lowercase() == wanted)
            .map(RegisteredTool::listing)
            .collect()
    }

    /// Tool names grouped by owning service, each group sorted.
    pub fn tools_by_service(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for tool in self.tools.read().unwrap_or_else(PoisonError::into_inner).values() {
            groups
                .entry(tool.service_name.clone())
                .or_default()
                .push(tool.name.clone());
        }
        let mut groups: Vec<(String, Vec<String>)> = groups.into_iter().collect();
        for (_, names) in groups.iter_mut() {
            names.sort();
        }
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(RegisteredTool::definition)
            .collect()
    }
}

impl ToolRegistrar for ToolRegistry {
    fn register_tool(&self, name: &str, description: &str, input_schema: Value, handler: ToolHandler) {
        self.register_service_tool("", name, description, input_schema, handler);
    }
}

/// Registrar handed to a [`Service`]; attributes every tool to that service.
struct ServiceRegistrar<'a> {
    registry: &'a ToolRegistry,
    service: &'a str,
}

impl ToolRegistrar for ServiceRegistrar<'_> {
    fn register_tool(&self, name: &str, description: &str, input_schema: Value, handler: ToolHandler) {
        self.registry
            .register_service_tool(self.service, name, description, input_schema, handler);
    }
}
