use std::path::Path;
use std::sync::Arc;

use crate::config::ModuleRef;
use crate::error::LoadError;
use crate::handler::ToolHandler;

use super::wasm::WasmRuntime;
use super::{read_module_file, resolve_path, ModuleResolver};

/// Resolves `kind: compiled` modules: a pre-built `.wasm` binary and the export
/// to bind. One binary may back several tools through different symbols.
pub struct CompiledResolver {
    runtime: Arc<WasmRuntime>,
}

impl CompiledResolver {
    pub fn new(runtime: Arc<WasmRuntime>) -> Self {
        Self { runtime }
    }
}

impl ModuleResolver for CompiledResolver {
    fn kind(&self) -> &'static str {
        "compiled"
    }

    fn resolve(&self, tool: &str, module: &ModuleRef, base_dir: &Path) -> Result<ToolHandler, LoadError> {
        let ModuleRef::Compiled { path, symbol } = module else {
            return Err(LoadError::unresolved(tool, "not a compiled module"));
        };
        if symbol.is_empty() {
            return Err(LoadError::unresolved(tool, "compiled module needs a 'symbol'"));
        }

        let bytes = read_module_file(tool, &resolve_path(base_dir, path))?;
        let compiled = self.runtime.compile_binary(tool, &bytes)?;
        self.runtime.adapt(tool, compiled, symbol)
    }
}
