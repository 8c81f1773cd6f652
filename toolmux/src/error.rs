//! Error types for every toolmux subsystem.
//!
//! Configuration and loading errors are fatal to the loader; dispatcher errors are
//! always folded into an [`RpcResponse`](crate::rpc::RpcResponse) and never escape
//! to the transport.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::rpc;

/// Errors raised while reading a declarative tools document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors a tool handler reports back to the dispatcher.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed(message.into())
    }
}

/// Errors that abort a load batch.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to resolve module for tool [{tool}]: {message}")]
    Unresolved { tool: String, message: String },

    #[error("handler for tool {tool} does not have the correct signature: {message}")]
    Signature { tool: String, message: String },

    #[error("invalid input schema for tool {tool}: {message}")]
    Schema { tool: String, message: String },

    #[error("no module resolver registered for kind '{kind}' (tool {tool})")]
    UnknownKind { tool: String, kind: String },

    #[error("module runtime error: {0}")]
    Runtime(String),
}

impl LoadError {
    pub fn unresolved(tool: &str, message: impl Into<String>) -> Self {
        LoadError::Unresolved {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub fn signature(tool: &str, message: impl Into<String>) -> Self {
        LoadError::Signature {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// Errors from the language-model collaborator.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(String),

    #[error("model provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model client not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Http(e.to_string())
    }
}

/// Dispatcher failures, each mapped onto a JSON-RPC error code.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to parse plan JSON: {0}")]
    Parse(String),

    #[error("{0}")]
    EmptyPlan(String),

    #[error("invalid action format: {0}")]
    InvalidAction(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("failed to execute tool {action}: {source}")]
    Execution {
        action: String,
        #[source]
        source: ToolError,
    },

    #[error("failed to call model: {0}")]
    Model(#[from] ModelError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn code(&self) -> i32 {
        match self {
            DispatchError::Parse(_) => rpc::PARSE_ERROR,
            DispatchError::EmptyPlan(_)
            | DispatchError::InvalidAction(_)
            | DispatchError::InvalidParams(_) => rpc::INVALID_PARAMS,
            DispatchError::UnknownAction(_) => rpc::METHOD_NOT_FOUND,
            DispatchError::Execution { .. }
            | DispatchError::Model(_)
            | DispatchError::Internal(_) => rpc::EXECUTION_ERROR,
        }
    }
}
