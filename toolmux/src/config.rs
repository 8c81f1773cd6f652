//! Declarative tools document.
//!
//! ```yaml
//! services:
//!   - name: git
//!     tools:
//!       - name: git_init
//!         description: Initialise a repository
//!         schema: { type: object, properties: { name: { type: string } } }
//!         module: { kind: source, path: plugins/git_init.wat }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ConfigError;

/// Exported symbol looked up when a source module does not name one.
pub const DEFAULT_HANDLER_SYMBOL: &str = "Handler";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    /// if false, skip this service
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// if false, skip this tool
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default = "default_schema")]
    pub schema: Value,
    pub module: ModuleRef,
}

/// Where a tool's handler comes from, discriminated by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleRef {
    /// WebAssembly text, read from `path` or given `inline`, compiled at load time.
    Source {
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        inline: Option<String>,
        #[serde(default = "default_symbol")]
        symbol: String,
    },
    /// A pre-compiled `.wasm` module and the export to bind.
    Compiled { path: PathBuf, symbol: String },
}

impl ModuleRef {
    pub fn kind(&self) -> &'static str {
        match self {
            ModuleRef::Source { .. } => "source",
            ModuleRef::Compiled { .. } => "compiled",
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            ModuleRef::Source { symbol, .. } | ModuleRef::Compiled { symbol, .. } => symbol,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

fn default_schema() -> Value {
    json!({ "type": "object" })
}

fn default_symbol() -> String {
    DEFAULT_HANDLER_SYMBOL.to_string()
}

impl ToolsConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&data)
    }

    /// Enabled services with only their enabled tools.
    pub fn enabled_services(&self) -> impl Iterator<Item = (&ServiceConfig, Vec<&ToolConfig>)> {
        self.services
            .iter()
            .filter(|svc| svc.enabled)
            .map(|svc| (svc, svc.tools.iter().filter(|t| t.enabled).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOC: &str = r#"
services:
  - name: git
    tools:
      - name: git_init
        description: Initialise a repository
        schema:
          type: object
          properties:
            name: { type: string }
        module: { kind: source, path: plugins/git_init.wat }
      - name: git_status
        enabled: false
        module: { kind: compiled, path: plugins/git.wasm, symbol: git_status }
  - name: docker
    enabled: false
    tools: []
"#;

    #[test]
    fn parses_tagged_module_refs_and_defaults() {
        let cfg = ToolsConfig::from_yaml_str(DOC).unwrap();
        assert_eq!(cfg.services.len(), 2);

        let git = &cfg.services[0];
        assert!(git.enabled);
        assert_eq!(
            git.tools[0].module,
            ModuleRef::Source {
                path: Some(PathBuf::from("plugins/git_init.wat")),
                inline: None,
                symbol: "Handler".to_string(),
            }
        );
        assert_eq!(git.tools[0].schema["properties"]["name"]["type"], "string");
        assert_eq!(git.tools[1].module.kind(), "compiled");
        assert_eq!(git.tools[1].module.symbol(), "git_status");
        assert_eq!(git.tools[1].schema, json!({ "type": "object" }));
        assert_eq!(git.tools[1].description, "");
    }

    #[test]
    fn enabled_services_skip_disabled_entries() {
        let cfg = ToolsConfig::from_yaml_str(DOC).unwrap();
        let enabled: Vec<(String, Vec<String>)> = cfg
            .enabled_services()
            .map(|(svc, tools)| (svc.name.clone(), tools.iter().map(|t| t.name.clone()).collect()))
            .collect();
        assert_eq!(enabled, vec![("git".to_string(), vec!["git_init".to_string()])]);
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let doc = r#"
services:
  - name: x
    tools:
      - name: t
        module: { kind: python, path: t.py }
"#;
        assert!(matches!(ToolsConfig::from_yaml_str(doc), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ToolsConfig::load(Path::new("/nonexistent/toolmux/tools.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
