use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::wire::ChatRequest;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat completions. `api_base` may point at any
/// compatible server (Azure proxies, vLLM, LM Studio...).
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
}

impl OpenAIProvider {
    pub fn new(api_key: String, api_base: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn body(req: &ChatRequest) -> ChatBody<'_> {
    let mut messages = Vec::with_capacity(2);
    if !req.system.is_empty() {
        messages.push(Msg { role: "system", content: &req.system });
    }
    messages.push(Msg { role: "user", content: &req.human });
    ChatBody {
        model: &req.model,
        messages,
        temperature: req.temperature,
    }
}

fn parse_content(text: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| PipelineError::Provider(format!("failed to parse OpenAI response: {e}\nRaw: {text}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| PipelineError::Provider("OpenAI response has no message content".into()))
}

#[async_trait]
impl super::Provider for OpenAIProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        let url = self.url();
        debug!(stage = %req.stage, %url, "openai request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body(req))
            .send()
            .await?;

        let text = super::check_status(resp).await?;
        parse_content(&text)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
