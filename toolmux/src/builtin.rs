//! Built-in `toolmux` service exposing registry listings as plan actions.
//!
//! Service hints match by substring; the name must not occur inside ordinary
//! words such as "filesystem".

use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use crate::error::ToolError;
use crate::handler::{handler_fn, ToolHandler};
use crate::registry::{Service, ToolRegistrar, ToolRegistry};

pub const BUILTIN_SERVICE: &str = "toolmux";

pub struct SystemService {
    registry: Weak<ToolRegistry>,
}

impl SystemService {
    pub fn new(registry: &Arc<ToolRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }

    /// Register the service into `registry`.
    pub fn install(registry: &Arc<ToolRegistry>) {
        registry.register_service(Arc::new(Self::new(registry)));
    }

    fn list_services(&self) -> ToolHandler {
        let registry = self.registry.clone();
        handler_fn(move |_ctx, _params| {
            let registry = registry.clone();
            async move {
                let registry = upgrade(&registry)?;
                Ok(json!(registry.list_services()))
            }
        })
    }

    fn list_tools(&self) -> ToolHandler {
        let registry = self.registry.clone();
        handler_fn(move |_ctx, params| {
            let registry = registry.clone();
            async move {
                let registry = upgrade(&registry)?;
                match params.get("name") {
                    Some(Value::String(name)) if !name.is_empty() => {
                        Ok(json!(registry.list_tools_for_service(name)))
                    }
                    None | Some(Value::Null) | Some(Value::String(_)) => Ok(json!(registry.list_tools())),
                    Some(other) => Err(ToolError::InvalidParams(format!(
                        "'name' must be a string, got {other}"
                    ))),
                }
            }
        })
    }
}

fn upgrade(registry: &Weak<ToolRegistry>) -> Result<Arc<ToolRegistry>, ToolError> {
    registry
        .upgrade()
        .ok_or_else(|| ToolError::failed("tool registry is no longer available"))
}

impl Service for SystemService {
    fn name(&self) -> &str {
        BUILTIN_SERVICE
    }

    fn register_tools(&self, registrar: &dyn ToolRegistrar) {
        registrar.register_tool(
            "list_services",
            "List all registered services",
            json!({ "type": "object", "properties": {} }),
            self.list_services(),
        );
        registrar.register_tool(
            "list_tools",
            "List registered tools, optionally only those of the named service",
            json!({
                "type": "object",
                "properties": { "name": { "type": "string", "description": "Service name" } }
            }),
            self.list_tools(),
        );
    }
}
