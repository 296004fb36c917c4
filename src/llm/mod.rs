//! Anthropic Messages API client and the collaborators built on it.
//!
//! Structured outputs use forced tool use: the request declares a single
//! tool and sets `tool_choice` to it, so the reply carries a `tool_use`
//! block whose `input` matches the tool's schema.

pub mod collaborators;
pub mod prompts;

pub use collaborators::{LlmActionGenerator, LlmReflector, LlmSynthesizer};

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    Tool { name: String },
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    /// Input of the first `tool_use` block calling `name`.
    pub fn tool_input(&self, name: &str) -> Option<&Value> {
        self.content.iter().find_map(|b| match b {
            ContentBlock::ToolUse { name: n, input, .. } if n == name => Some(input),
            _ => None,
        })
    }

    /// All text blocks joined.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

pub struct AnthropicClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(
            config.provider == "anthropic",
            "unknown llm provider: {}. Supported: anthropic",
            config.provider
        );
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} is not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// A request with this client's model and sampling settings.
    pub fn request(&self, system: String, user: String) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
            system: Some(system),
            messages: vec![Message::user(user)],
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    /// Send a request. Transport, status and parse failures are all
    /// [`Error::Collaborator`] tagged with `service`.
    pub async fn send(&self, service: &'static str, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::collaborator(service, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::collaborator(service, format!("API error {status}: {body}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::collaborator(service, format!("failed to read response: {e}")))?;
        debug!(service, bytes = text.len(), "llm response received");
        serde_json::from_str(&text)
            .map_err(|e| Error::collaborator(service, format!("failed to parse response: {e}")))
    }

    /// Force a call to `tool` and return its input.
    pub async fn call_tool(
        &self,
        service: &'static str,
        system: String,
        user: String,
        tool: Tool,
    ) -> Result<Value> {
        let name = tool.name;
        let mut request = self.request(system, user);
        request.tool_choice = Some(ToolChoice::Tool { name: name.to_string() });
        request.tools = vec![tool];
        let response = self.send(service, &request).await?;
        response
            .tool_input(name)
            .cloned()
            .ok_or_else(|| Error::collaborator(service, format!("response did not call `{name}`")))
    }

    /// Plain text completion.
    pub async fn complete(&self, service: &'static str, system: String, user: String) -> Result<String> {
        let response = self.send(service, &self.request(system, user)).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(Error::collaborator(service, "response had no text"));
        }
        Ok(text)
    }
}
