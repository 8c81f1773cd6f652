#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use toolmux::{handler_fn, ModelClient, ModelError, ModelReply, ModelRequest, Service, ToolHandler, ToolRegistrar};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn fixture_text(name: &str) -> String {
    std::fs::read_to_string(fixture(name)).unwrap()
}

/// Model that replays canned replies and records every request it sees.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<Vec<ModelReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Arc<Self> {
        let mut replies = replies;
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ModelError::InvalidResponse("no scripted reply left".to_string()))
    }
}

/// Model that never answers.
pub struct StalledModel;

#[async_trait]
impl ModelClient for StalledModel {
    async fn generate(&self, _request: ModelRequest) -> Result<ModelReply, ModelError> {
        futures::future::pending::<Result<ModelReply, ModelError>>().await
    }
}

/// Handler counting its invocations and echoing its parameters.
pub fn counting(counter: Arc<AtomicUsize>) -> ToolHandler {
    handler_fn(move |ctx, params| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "tool": ctx.tool, "params": Value::Object(params) }))
        }
    })
}

/// Service registering a fixed set of native tools.
pub struct NativeService {
    pub name: String,
    pub tools: Vec<(String, String, Value, ToolHandler)>,
}

impl NativeService {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
        }
    }

    pub fn tool(mut self, name: &str, description: &str, schema: Value, handler: ToolHandler) -> Self {
        self.tools.push((name.to_string(), description.to_string(), schema, handler));
        self
    }
}

impl Service for NativeService {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_tools(&self, registrar: &dyn ToolRegistrar) {
        for (name, description, schema, handler) in &self.tools {
            registrar.register_tool(name, description, schema.clone(), handler.clone());
        }
    }
}
