use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error};

use super::{FunctionCall, ModelClient, ModelReply, ModelRequest};
use crate::error::ModelError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Connection settings for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

impl ModelConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            base_url: None,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

pub struct OpenAiModelClient {
    config: ModelConfig,
    client: Client,
}

impl OpenAiModelClient {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let client = Client::builder().build()?;
        Ok(Self { config, client })
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.directive },
                { "role": "user", "content": request.instruction }
            ]
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

#[async_trait]
impl ModelClient for OpenAiModelClient {
    async fn generate(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        let url = self.config.endpoint();
        debug!(
            "Calling model {} with {} tools, directive length {} chars",
            self.config.model,
            request.tools.len(),
            request.directive.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Model provider returned {}: {}", status, body);
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_json: Value = response.json().await?;
        extract_reply(&response_json)
    }
}

/// Pull the reply text and first tool call out of a chat completions response.
pub fn extract_reply(response_json: &Value) -> Result<ModelReply, ModelError> {
    let message = response_json["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| ModelError::InvalidResponse("model returned no choices".to_string()))?;

    let text = message["content"].as_str().unwrap_or_default().to_string();
    let function_call = message["tool_calls"]
        .as_array()
        .and_then(|calls| calls.iter().find_map(|call| {
            let name = call["function"]["name"].as_str()?;
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
            Some(FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            })
        }));

    debug!("Raw model response: {:?}", text);
    Ok(ModelReply { text, function_call })
}
