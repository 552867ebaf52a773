use async_trait::async_trait;
use std::time::Duration;

use crate::config::{Config, ProviderKind};
use crate::errors::{PipelineError, Result};
use crate::wire::ChatRequest;

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod scripted;

/// A hosted chat model. Returns the completion text verbatim.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, req: &ChatRequest) -> Result<String>;

    fn name(&self) -> &'static str;
}

pub type DynProvider = Box<dyn Provider + Send + Sync>;

/// Build the provider named in `cfg`. The API key is read from the
/// environment here, once.
pub fn make_provider(cfg: &Config) -> Result<DynProvider> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    match cfg.provider {
        ProviderKind::OpenAI => {
            let key = api_key(cfg)?;
            Ok(Box::new(openai::OpenAIProvider::new(
                key,
                cfg.api_base.clone(),
                timeout,
            )?))
        }
        ProviderKind::Anthropic => {
            let key = api_key(cfg)?;
            Ok(Box::new(anthropic::Anthropic::new(
                key,
                cfg.api_base.clone(),
                timeout,
            )?))
        }
        ProviderKind::Ollama => Ok(Box::new(ollama::Ollama::new(
            cfg.api_base.clone(),
            timeout,
        )?)),
    }
}

fn api_key(cfg: &Config) -> Result<String> {
    let var = cfg.api_key_env();
    match std::env::var(&var) {
        Ok(k) if !k.trim().is_empty() => Ok(k),
        _ => Err(PipelineError::Config(format!("{var} env var is not set"))),
    }
}

/// Turn a non-success HTTP status into `PipelineError::Api`, keeping the body.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(PipelineError::Api {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}
