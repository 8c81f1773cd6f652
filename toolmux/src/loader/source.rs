use std::path::Path;
use std::sync::Arc;

use crate::config::ModuleRef;
use crate::error::LoadError;
use crate::handler::ToolHandler;

use super::wasm::WasmRuntime;
use super::{read_module_file, resolve_path, ModuleResolver};

/// Resolves `kind: source` modules: WebAssembly text read from a file or given
/// inline, compiled in-process.
pub struct SourceResolver {
    runtime: Arc<WasmRuntime>,
}

impl SourceResolver {
    pub fn new(runtime: Arc<WasmRuntime>) -> Self {
        Self { runtime }
    }
}

impl ModuleResolver for SourceResolver {
    fn kind(&self) -> &'static str {
        "source"
    }

    fn resolve(&self, tool: &str, module: &ModuleRef, base_dir: &Path) -> Result<ToolHandler, LoadError> {
        let ModuleRef::Source { path, inline, symbol } = module else {
            return Err(LoadError::unresolved(tool, "not a source module"));
        };

        let text = match (inline, path) {
            (Some(_), Some(_)) => {
                return Err(LoadError::unresolved(tool, "source module sets both 'path' and 'inline'"));
            }
            (Some(text), None) => text.clone(),
            (None, Some(path)) => {
                let bytes = read_module_file(tool, &resolve_path(base_dir, path))?;
                String::from_utf8(bytes)
                    .map_err(|e| LoadError::unresolved(tool, format!("module source is not UTF-8: {e}")))?
            }
            (None, None) => {
                return Err(LoadError::unresolved(tool, "source module needs 'path' or 'inline'"));
            }
        };

        let compiled = self.runtime.compile_text(tool, &text)?;
        self.runtime.adapt(tool, compiled, symbol)
    }
}
