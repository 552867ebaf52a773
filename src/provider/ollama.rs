use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::Provider;
use crate::errors::{PipelineError, Result};
use crate::wire::ChatRequest;

pub const DEFAULT_URL: &str = "http://localhost:11434";

pub struct Ollama {
    client: Client,
    url: String,
}

impl Ollama {
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.unwrap_or_else(|| DEFAULT_URL.to_string()),
        })
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: MsgOut,
}

#[derive(Deserialize)]
struct MsgOut {
    content: String,
}

fn to_messages(req: &ChatRequest) -> Vec<Msg<'_>> {
    let mut out = Vec::with_capacity(2);
    if !req.system.is_empty() {
        out.push(Msg { role: "system", content: &req.system });
    }
    out.push(Msg { role: "user", content: &req.human });
    out
}

#[async_trait]
impl Provider for Ollama {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let body = ChatBody {
            model: &req.model,
            messages: to_messages(req),
            stream: false,
            options: OllamaOptions { temperature: req.temperature },
        };
        debug!(stage = %req.stage, %url, "ollama request");

        let resp = self.client.post(&url).json(&body).send().await?;
        let text = super::check_status(resp).await?;

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Provider(format!("ollama response parse error: {e}")))?;
        Ok(parsed.message.content)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
