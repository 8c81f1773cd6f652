//! Language-model collaborator used during planning.

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::registry::ToolDefinition;

pub use openai::{extract_reply, ModelConfig, OpenAiModelClient};

/// Everything the model sees for one planning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub instruction: String,
    pub tools: Vec<ToolDefinition>,
    pub directive: String,
}

/// A named function call with its raw JSON argument string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_call: None,
        }
    }

    pub fn call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            function_call: Some(FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            }),
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, ModelError>;
}

/// Stand-in used when no provider credentials are available. Every call fails.
#[derive(Debug, Clone)]
pub struct UnconfiguredModel {
    reason: String,
}

impl UnconfiguredModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ModelClient for UnconfiguredModel {
    async fn generate(&self, _request: ModelRequest) -> Result<ModelReply, ModelError> {
        Err(ModelError::NotConfigured(self.reason.clone()))
    }
}
