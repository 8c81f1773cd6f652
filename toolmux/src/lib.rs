// toolmux
// Tool registry, dynamic module loader and plan dispatcher behind a JSON-RPC front.

pub mod builtin;
pub mod config;
pub mod directive;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod intent;
pub mod loader;
pub mod model;
pub mod plan;
pub mod registry;
pub mod rpc;
pub mod transport;

pub use builtin::SystemService;
pub use config::{ModuleRef, ServiceConfig, ToolConfig, ToolsConfig};
pub use dispatcher::{Classification, Dispatcher, DispatcherConfig, InstructionOptions};
pub use error::{ConfigError, DispatchError, LoadError, ModelError, ToolError};
pub use handler::{handler_fn, Params, ToolContext, ToolHandler, ToolResult};
pub use loader::{LoadSummary, ModuleLoader, ModuleResolver};
pub use model::{ModelClient, ModelReply, ModelRequest, OpenAiModelClient, UnconfiguredModel};
pub use registry::{Service, ToolDefinition, ToolRegistrar, ToolRegistry};
pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use transport::RpcService;
