//! Dynamic Module Loader
//!
//! Turns the declarative tools document into registered tools. Each enabled tool
//! is resolved through the [`ModuleResolver`] registered for its `module.kind`.
//! Loading is all-or-nothing: every enabled tool is resolved before the registry
//! is touched, so a failed load leaves the registry as it was.

mod compiled;
mod source;
pub mod wasm;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ModuleRef, ToolConfig, ToolsConfig};
use crate::error::LoadError;
use crate::handler::ToolHandler;
use crate::registry::{Service, ToolRegistrar, ToolRegistry};

pub use compiled::CompiledResolver;
pub use source::SourceResolver;
pub use wasm::WasmRuntime;

/// Strategy turning a module reference into a checked handler.
pub trait ModuleResolver: Send + Sync {
    /// The `module.kind` this resolver handles.
    fn kind(&self) -> &'static str;

    /// Resolve `module` for `tool`. Relative paths are taken from `base_dir`.
    fn resolve(&self, tool: &str, module: &ModuleRef, base_dir: &Path) -> Result<ToolHandler, LoadError>;
}

/// A tool whose handler has been resolved but not yet registered.
#[derive(Clone)]
pub struct LoadedTool {
    pub name: String,
    pub description: String,
    pub schema: Value,
    pub handler: ToolHandler,
}

/// A configured service and its resolved tools, registered through
/// [`ToolRegistry::register_service`].
pub struct ConfiguredService {
    name: String,
    tools: Vec<LoadedTool>,
}

impl ConfiguredService {
    pub fn new(name: impl Into<String>, tools: Vec<LoadedTool>) -> Self {
        Self {
            name: name.into(),
            tools,
        }
    }
}

impl Service for ConfiguredService {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_tools(&self, registrar: &dyn ToolRegistrar) {
        for tool in &self.tools {
            registrar.register_tool(&tool.name, &tool.description, tool.schema.clone(), tool.handler.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub services: usize,
    pub tools: usize,
}

pub struct ModuleLoader {
    resolvers: HashMap<&'static str, Arc<dyn ModuleResolver>>,
}

impl ModuleLoader {
    /// Loader with the source and compiled resolvers sharing one runtime.
    pub fn new() -> Result<Self, LoadError> {
        let runtime = WasmRuntime::new()?;
        Ok(Self::empty()
            .with_resolver(Arc::new(SourceResolver::new(runtime.clone())))
            .with_resolver(Arc::new(CompiledResolver::new(runtime))))
    }

    /// Loader with no resolvers; every module reference is an unknown kind.
    pub fn empty() -> Self {
        Self {
            resolvers: HashMap::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolvers.insert(resolver.kind(), resolver);
        self
    }

    /// Check the tool's schema and resolve its handler. Nothing is registered.
    pub fn resolve_tool(&self, tool: &ToolConfig, base_dir: &Path) -> Result<LoadedTool, LoadError> {
        if let Err(e) = JSONSchema::compile(&tool.schema) {
            return Err(LoadError::Schema {
                tool: tool.name.clone(),
                message: e.to_string(),
            });
        }

        let kind = tool.module.kind();
        let resolver = self.resolvers.get(kind).ok_or_else(|| LoadError::UnknownKind {
            tool: tool.name.clone(),
            kind: kind.to_string(),
        })?;
        let handler = resolver.resolve(&tool.name, &tool.module, base_dir)?;

        Ok(LoadedTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            schema: tool.schema.clone(),
            handler,
        })
    }

    /// Resolve every enabled tool in `config`, then register each service.
    pub fn load_config(
        &self,
        config: &ToolsConfig,
        base_dir: &Path,
        registry: &ToolRegistry,
    ) -> Result<LoadSummary, LoadError> {
        let mut services = Vec::new();
        let mut seen = HashSet::new();

        for (service, tools) in config.enabled_services() {
            let mut loaded = Vec::with_capacity(tools.len());
            for tool in tools {
                if !seen.insert(tool.name.as_str()) {
                    warn!("Tool {} is defined more than once; the last definition wins", tool.name);
                }
                debug!("Resolving tool {} ({} module)", tool.name, tool.module.kind());
                loaded.push(self.resolve_tool(tool, base_dir)?);
            }
            services.push(ConfiguredService::new(&service.name, loaded));
        }

        let summary = LoadSummary {
            services: services.len(),
            tools: services.iter().map(|s| s.tools.len()).sum(),
        };
        for service in services {
            registry.register_service(Arc::new(service));
        }
        info!("Loaded {} tools from {} services", summary.tools, summary.services);
        Ok(summary)
    }

    pub fn load_str(&self, yaml: &str, base_dir: &Path, registry: &ToolRegistry) -> Result<LoadSummary, LoadError> {
        let config = ToolsConfig::from_yaml_str(yaml)?;
        self.load_config(&config, base_dir, registry)
    }

    /// Load a tools document from disk. Module paths are relative to its directory.
    pub fn load_file(&self, path: &Path, registry: &ToolRegistry) -> Result<LoadSummary, LoadError> {
        info!("Loading tools from {}", path.display());
        let config = ToolsConfig::load(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.load_config(&config, base_dir, registry)
    }
}

pub(crate) fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

pub(crate) fn read_module_file(tool: &str, path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|e| LoadError::unresolved(tool, format!("failed to read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use serde_json::json;

    struct NativeResolver;

    impl ModuleResolver for NativeResolver {
        fn kind(&self) -> &'static str {
            "source"
        }

        fn resolve(&self, tool: &str, module: &ModuleRef, _base_dir: &Path) -> Result<ToolHandler, LoadError> {
            let symbol = module.symbol().to_string();
            if symbol == "Broken" {
                return Err(LoadError::signature(tool, "wrong shape"));
            }
            Ok(handler_fn(move |_ctx, _params| {
                let symbol = symbol.clone();
                async move { Ok(json!(symbol)) }
            }))
        }
    }

    fn doc(second_symbol: &str) -> String {
        format!(
            r#"
services:
  - name: docker
    tools:
      - name: pull_image
        module: {{ kind: source, inline: "x" }}
      - name: create_network
        module: {{ kind: source, inline: "x", symbol: {second_symbol} }}
"#
        )
    }

    #[test]
    fn resolved_tools_are_registered_under_their_service() {
        let loader = ModuleLoader::empty().with_resolver(Arc::new(NativeResolver));
        let registry = ToolRegistry::new();
        let summary = loader.load_str(&doc("Handler"), Path::new("."), &registry).unwrap();

        assert_eq!(summary, LoadSummary { services: 1, tools: 2 });
        assert_eq!(registry.list_services(), vec!["docker".to_string()]);
        assert_eq!(registry.get("pull_image").unwrap().service_name, "docker");
    }

    #[test]
    fn failure_leaves_registry_untouched() {
        let loader = ModuleLoader::empty().with_resolver(Arc::new(NativeResolver));
        let registry = ToolRegistry::new();
        let err = loader.load_str(&doc("Broken"), Path::new("."), &registry).unwrap_err();

        assert!(err.to_string().contains("create_network"));
        assert!(registry.is_empty());
        assert_eq!(registry.service_count(), 0);
    }

    #[test]
    fn unknown_kind_without_resolver() {
        let loader = ModuleLoader::empty();
        let registry = ToolRegistry::new();
        let err = loader.load_str(&doc("Handler"), Path::new("."), &registry).unwrap_err();
        assert!(matches!(err, LoadError::UnknownKind { ref kind, .. } if kind == "source"));
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let loader = ModuleLoader::empty().with_resolver(Arc::new(NativeResolver));
        let tool = ToolConfig {
            name: "bad_schema".into(),
            description: String::new(),
            enabled: true,
            schema: json!({ "type": 12 }),
            module: ModuleRef::Source {
                path: None,
                inline: Some("x".into()),
                symbol: "Handler".into(),
            },
        };
        let err = loader.resolve_tool(&tool, Path::new(".")).err().unwrap();
        assert!(matches!(err, LoadError::Schema { ref tool, .. } if tool == "bad_schema"));
    }

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        assert_eq!(
            resolve_path(Path::new("/etc/toolmux"), Path::new("plugins/a.wat")),
            PathBuf::from("/etc/toolmux/plugins/a.wat")
        );
        assert_eq!(resolve_path(Path::new("/etc"), Path::new("/opt/a.wasm")), PathBuf::from("/opt/a.wasm"));
    }
}
