use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::Provider;
use crate::errors::{PipelineError, Result};
use crate::wire::ChatRequest;

pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct Anthropic {
    client: Client,
    api_key: String,
    api_base: String,
    max_tokens: u32,
}

impl Anthropic {
    pub fn new(api_key: String, api_base: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            max_tokens: 8192,
        })
    }
}

#[derive(Serialize)]
struct MsgRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Msg<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MsgResponse {
    content: Vec<Block>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(default)]
    text: String,
    #[serde(default)]
    r#type: String,
}

fn body(req: &ChatRequest, max_tokens: u32) -> MsgRequest<'_> {
    MsgRequest {
        model: &req.model,
        max_tokens,
        temperature: req.temperature,
        messages: vec![Msg { role: "user", content: &req.human }],
        system: (!req.system.is_empty()).then_some(req.system.as_str()),
    }
}

fn parse_content(text: &str) -> Result<String> {
    let parsed: MsgResponse = serde_json::from_str(text)
        .map_err(|e| PipelineError::Provider(format!("anthropic response parse error: {e}")))?;
    let joined: String = parsed
        .content
        .into_iter()
        .filter(|b| b.r#type == "text")
        .map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    if joined.is_empty() {
        return Err(PipelineError::Provider("anthropic: empty content".into()));
    }
    Ok(joined)
}

#[async_trait]
impl Provider for Anthropic {
    async fn complete(&self, req: &ChatRequest) -> Result<String> {
        let url = format!("{}/v1/messages", self.api_base.trim_end_matches('/'));
        debug!(stage = %req.stage, %url, "anthropic request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body(req, self.max_tokens))
            .send()
            .await?;

        let text = super::check_status(resp).await?;
        parse_content(&text)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
