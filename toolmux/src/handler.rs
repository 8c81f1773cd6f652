//! The Handler Contract
//!
//! Every tool, native or loaded from a module, is adapted to one shape:
//! `(ToolContext, Params) -> Result<Value, ToolError>`, returned as a boxed future.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::ToolError;

/// Unordered string-keyed bag of loosely-typed parameters.
pub type Params = serde_json::Map<String, Value>;

pub type ToolResult = Result<Value, ToolError>;

/// Type alias for async tool handler functions
pub type ToolHandler = Arc<dyn Fn(ToolContext, Params) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// Wrap an async closure as a [`ToolHandler`].
pub fn handler_fn<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolContext, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    Arc::new(move |ctx: ToolContext, params: Params| -> BoxFuture<'static, ToolResult> { Box::pin(f(ctx, params)) })
}

/// Per-invocation execution context handed to a handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tool: String,
    pub trace_id: String,
    timeout: Duration,
    deadline: Instant,
}

impl ToolContext {
    pub fn new(tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Run a handler under its context deadline. Exceeding the deadline drops the
/// in-flight future and reports [`ToolError::Timeout`].
pub async fn invoke_with_deadline(handler: &ToolHandler, ctx: ToolContext, params: Params) -> ToolResult {
    let timeout = ctx.timeout();
    let deadline = ctx.deadline();
    match tokio::time::timeout_at(deadline, handler(ctx, params)).await {
        Ok(result) => result,
        Err(_) => Err(ToolError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn handler_fn_receives_context_and_params() {
        let handler = handler_fn(|ctx, params| async move {
            Ok(json!({ "tool": ctx.tool, "name": params.get("name").cloned() }))
        });
        let mut params = Params::new();
        params.insert("name".into(), json!("mysql"));

        let out = invoke_with_deadline(&handler, ToolContext::new("pull_image", Duration::from_secs(5)), params)
            .await
            .unwrap();
        assert_eq!(out, json!({ "tool": "pull_image", "name": "mysql" }));
    }

    #[tokio::test]
    async fn deadline_cancels_slow_handler() {
        let handler = handler_fn(|_ctx, _params| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        });
        let ctx = ToolContext::new("slow", Duration::from_millis(20));
        let err = invoke_with_deadline(&handler, ctx, Params::new()).await.unwrap_err();
        assert_eq!(err, ToolError::Timeout(Duration::from_millis(20)));
    }

    #[test]
    fn context_tracks_remaining_time() {
        let ctx = ToolContext::new("t", Duration::from_secs(30));
        assert!(!ctx.is_expired());
        assert!(ctx.remaining() <= Duration::from_secs(30));
        assert!(!ctx.trace_id.is_empty());
    }
}
