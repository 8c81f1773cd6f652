//! WebAssembly runtime backing both module resolvers.
//!
//! A loaded module satisfies the Handler Contract through a small ABI:
//!
//! - `memory`: exported linear memory
//! - `alloc(len: i32) -> i32`: guest buffer the host writes parameters into
//! - handler symbol `(ptr: i32, len: i32) -> i64`: reads the JSON parameters
//!   object at `ptr..ptr+len` and returns `(out_ptr << 32) | out_len`, pointing
//!   at a JSON envelope `{"ok": <outcome>}` or `{"err": "<message>"}`.
//!
//! Host capabilities are imported from `env`: `log(ptr, len)` and
//! `deadline_ms() -> i64`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};
use wasmtime::{Caller, Config, Engine, ExternType, Linker, Module, Store, Trap, ValType};

use crate::error::{LoadError, ToolError};
use crate::handler::{handler_fn, Params, ToolContext, ToolHandler, ToolResult};

pub const ALLOC_SYMBOL: &str = "alloc";
pub const MEMORY_EXPORT: &str = "memory";

const EPOCH_TICK: Duration = Duration::from_millis(10);
const LOAD_PROBE_BUDGET: Duration = Duration::from_secs(5);

struct HostState {
    tool: String,
    deadline: std::time::Instant,
}

/// Shared engine, host linker and epoch ticker. Every instantiation gets its own
/// `Store`, so tools never share guest state.
pub struct WasmRuntime {
    engine: Engine,
    linker: Linker<HostState>,
    stop: Arc<AtomicBool>,
}

impl WasmRuntime {
    pub fn new() -> Result<Arc<Self>, LoadError> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config)
            .map_err(|e| LoadError::Runtime(format!("failed to create engine: {e}")))?;
        let linker = host_linker(&engine)?;

        let stop = Arc::new(AtomicBool::new(false));
        spawn_epoch_ticker(engine.clone(), stop.clone())?;

        Ok(Arc::new(Self { engine, linker, stop }))
    }

    /// Compile WebAssembly text.
    pub fn compile_text(&self, tool: &str, source: &str) -> Result<Module, LoadError> {
        let bytes = wat::parse_str(source)
            .map_err(|e| LoadError::unresolved(tool, format!("invalid module source: {e}")))?;
        self.compile_binary(tool, &bytes)
    }

    pub fn compile_binary(&self, tool: &str, bytes: &[u8]) -> Result<Module, LoadError> {
        Module::from_binary(&self.engine, bytes)
            .map_err(|e| LoadError::unresolved(tool, format!("failed to compile module: {e:#}")))
    }

    /// Check `symbol` against the handler ABI, trial-instantiate the module in an
    /// isolated store and adapt it to a [`ToolHandler`].
    pub fn adapt(self: &Arc<Self>, tool: &str, module: Module, symbol: &str) -> Result<ToolHandler, LoadError> {
        check_exports(tool, &module, symbol)?;

        let mut store = self.store(tool, LOAD_PROBE_BUDGET);
        self.linker
            .instantiate(&mut store, &module)
            .map_err(|e| LoadError::unresolved(tool, format!("failed to instantiate module: {e:#}")))?;
        debug!("Module for tool {} exports a valid '{}' handler", tool, symbol);

        let handler = Arc::new(WasmHandler {
            runtime: self.clone(),
            module,
            symbol: symbol.to_string(),
        });
        Ok(handler_fn(move |ctx, params| {
            let handler = handler.clone();
            async move { handler.invoke(ctx, params).await }
        }))
    }

    fn store(&self, tool: &str, budget: Duration) -> Store<HostState> {
        let mut store = Store::new(
            &self.engine,
            HostState {
                tool: tool.to_string(),
                deadline: std::time::Instant::now() + budget,
            },
        );
        store.set_epoch_deadline(epoch_ticks(budget));
        store
    }
}

impl Drop for WasmRuntime {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn epoch_ticks(budget: Duration) -> u64 {
    (budget.as_millis() / EPOCH_TICK.as_millis()) as u64 + 1
}

fn spawn_epoch_ticker(engine: Engine, stop: Arc<AtomicBool>) -> Result<(), LoadError> {
    std::thread::Builder::new()
        .name("toolmux-epoch".to_string())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(EPOCH_TICK);
                engine.increment_epoch();
            }
        })
        .map(|_| ())
        .map_err(|e| LoadError::Runtime(format!("failed to start epoch ticker: {e}")))
}

fn host_linker(engine: &Engine) -> Result<Linker<HostState>, LoadError> {
    let mut linker = Linker::new(engine);
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                let message = read_guest_string(&mut caller, ptr, len)
                    .unwrap_or_else(|e| format!("<unreadable log message: {e}>"));
                info!(tool = %caller.data().tool, "{}", message);
            },
        )
        .map_err(|e| LoadError::Runtime(format!("failed to define env.log: {e}")))?;
    linker
        .func_wrap("env", "deadline_ms", |caller: Caller<'_, HostState>| -> i64 {
            let remaining = caller
                .data()
                .deadline
                .saturating_duration_since(std::time::Instant::now());
            i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX)
        })
        .map_err(|e| LoadError::Runtime(format!("failed to define env.deadline_ms: {e}")))?;
    Ok(linker)
}

fn read_guest_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<String, String> {
    let memory = caller
        .get_export(MEMORY_EXPORT)
        .and_then(|export| export.into_memory())
        .ok_or_else(|| "module exports no memory".to_string())?;
    let (ptr, len) = (ptr as u32 as usize, len as u32 as usize);
    guest_range(ptr, len, memory.data_size(&*caller))?;
    let mut buf = vec![0u8; len];
    memory.read(&*caller, ptr, &mut buf).map_err(|e| e.to_string())?;
    String::from_utf8(buf).map_err(|e| e.to_string())
}

/// Bounds-check a guest `(ptr, len)` pair before allocating a host buffer for it.
fn guest_range(ptr: usize, len: usize, memory_size: usize) -> Result<(), String> {
    match ptr.checked_add(len) {
        Some(end) if end <= memory_size => Ok(()),
        _ => Err(format!(
            "range {ptr}+{len} exceeds guest memory of {memory_size} bytes"
        )),
    }
}

fn check_exports(tool: &str, module: &Module, symbol: &str) -> Result<(), LoadError> {
    match module.get_export(MEMORY_EXPORT) {
        Some(ExternType::Memory(_)) => {}
        Some(_) => {
            return Err(LoadError::signature(tool, "export 'memory' is not a memory"));
        }
        None => return Err(LoadError::unresolved(tool, "module does not export 'memory'")),
    }
    expect_func(tool, module, ALLOC_SYMBOL, &[ValType::I32], &[ValType::I32])?;
    expect_func(tool, module, symbol, &[ValType::I32, ValType::I32], &[ValType::I64])
}

fn expect_func(
    tool: &str,
    module: &Module,
    name: &str,
    params: &[ValType],
    results: &[ValType],
) -> Result<(), LoadError> {
    let ty = match module.get_export(name) {
        Some(ExternType::Func(ty)) => ty,
        Some(_) => {
            return Err(LoadError::signature(tool, format!("export '{name}' is not a function")));
        }
        None => {
            return Err(LoadError::unresolved(
                tool,
                format!("module does not export symbol '{name}'"),
            ));
        }
    };
    let actual_params: Vec<ValType> = ty.params().collect();
    let actual_results: Vec<ValType> = ty.results().collect();
    if actual_params != params || actual_results != results {
        return Err(LoadError::signature(
            tool,
            format!(
                "'{name}' is {actual_params:?} -> {actual_results:?}, expected {params:?} -> {results:?}"
            ),
        ));
    }
    Ok(())
}

struct WasmHandler {
    runtime: Arc<WasmRuntime>,
    module: Module,
    symbol: String,
}

impl WasmHandler {
    async fn invoke(self: Arc<Self>, ctx: ToolContext, params: Params) -> ToolResult {
        let timeout = ctx.timeout();
        let remaining = ctx.remaining();
        let tool = ctx.tool;
        tokio::task::spawn_blocking(move || self.call_blocking(&tool, remaining, timeout, &params))
            .await
            .map_err(|e| ToolError::failed(format!("handler task failed: {e}")))?
    }

    fn call_blocking(&self, tool: &str, remaining: Duration, timeout: Duration, params: &Params) -> ToolResult {
        let input = serde_json::to_vec(params)
            .map_err(|e| ToolError::InvalidParams(format!("failed to encode parameters: {e}")))?;
        let len = i32::try_from(input.len())
            .map_err(|_| ToolError::InvalidParams("parameters too large".to_string()))?;

        let mut store = self.runtime.store(tool, remaining);
        let instance = self
            .runtime
            .linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| trap_error(e, timeout))?;
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| ToolError::failed("module exports no memory"))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, ALLOC_SYMBOL)
            .map_err(|e| ToolError::failed(format!("{e:#}")))?;
        let entry = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, &self.symbol)
            .map_err(|e| ToolError::failed(format!("{e:#}")))?;

        let ptr = alloc.call(&mut store, len).map_err(|e| trap_error(e, timeout))?;
        memory
            .write(&mut store, ptr as u32 as usize, &input)
            .map_err(|e| ToolError::failed(format!("failed to write parameters: {e}")))?;

        let packed = entry.call(&mut store, (ptr, len)).map_err(|e| trap_error(e, timeout))?;
        let (out_ptr, out_len) = unpack(packed);
        guest_range(out_ptr, out_len, memory.data_size(&store))
            .map_err(|e| ToolError::failed(format!("failed to read handler output: {e}")))?;
        let mut output = vec![0u8; out_len];
        memory
            .read(&store, out_ptr, &mut output)
            .map_err(|e| ToolError::failed(format!("failed to read handler output: {e}")))?;
        decode_envelope(&output)
    }
}

fn trap_error(err: wasmtime::Error, timeout: Duration) -> ToolError {
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
        ToolError::Timeout(timeout)
    } else {
        ToolError::failed(format!("{err:#}"))
    }
}

fn unpack(packed: i64) -> (usize, usize) {
    let packed = packed as u64;
    ((packed >> 32) as usize, (packed & 0xffff_ffff) as usize)
}

fn decode_envelope(bytes: &[u8]) -> ToolResult {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ToolError::failed(format!("handler returned invalid JSON: {e}")))?;
    let Value::Object(mut envelope) = value else {
        return Err(ToolError::failed("handler envelope is not an object"));
    };
    if let Some(err) = envelope.remove("err") {
        return Err(ToolError::Failed(match err {
            Value::String(message) => message,
            other => other.to_string(),
        }));
    }
    envelope
        .remove("ok")
        .ok_or_else(|| ToolError::failed("handler envelope has neither 'ok' nor 'err'"))
}
