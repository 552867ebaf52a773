use clap::ValueEnum;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{PipelineError, Result};
use crate::plan::DEFAULT_CALL_PATTERN;
use crate::prompt::TemplateOverride;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[value(name = "openai", alias = "open-ai")]
    #[serde(alias = "open-ai")]
    OpenAI,
    Anthropic,
    Ollama,
}

/// What a feedback loop does when its round budget is spent and the
/// artifact is still judged invalid.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Exhaustion {
    /// Warn and continue with the latest artifact.
    AcceptBestEffort,
    /// Stop the run with `LoopExhausted`.
    Fail,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombineMode {
    /// Merge snippets guided by the instruction and the plan.
    Plan,
    /// Merge snippets by function call order only.
    Functions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub root: String,
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub api_base: Option<String>,
    /// Name of the env var holding the API key; defaults per provider.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub plan_feedback_rounds: usize,
    pub task_repair_rounds: usize,
    pub code_refine_rounds: usize,
    pub on_exhausted: Exhaustion,
    pub combine: CombineMode,
    pub concurrency: usize,
    pub plan_call_pattern: String,
    pub save_transcript: bool,
    pub auto_approve: bool,
    pub prompts: BTreeMap<String, TemplateOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: ".".into(),
            provider: ProviderKind::OpenAI,
            model: "gpt-4o-mini".into(),
            temperature: 0.0,
            api_base: None,
            api_key_env: None,
            timeout_secs: 600,
            plan_feedback_rounds: 1,
            task_repair_rounds: 2,
            code_refine_rounds: 1,
            on_exhausted: Exhaustion::AcceptBestEffort,
            combine: CombineMode::Plan,
            concurrency: 4,
            plan_call_pattern: DEFAULT_CALL_PATTERN.into(),
            save_transcript: false,
            auto_approve: false,
            prompts: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Read a TOML or YAML (by extension) config file; `None` gives defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let cfg: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&text)
                .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?,
            _ => toml::from_str(&text)
                .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(PipelineError::Config("concurrency must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(PipelineError::Config(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.model.trim().is_empty() {
            return Err(PipelineError::Config("model name is empty".into()));
        }
        Ok(())
    }

    pub fn api_key_env(&self) -> String {
        if let Some(var) = &self.api_key_env {
            return var.clone();
        }
        match self.provider {
            ProviderKind::OpenAI => "OPENAI_API_KEY".into(),
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY".into(),
            ProviderKind::Ollama => "OLLAMA_API_KEY".into(),
        }
    }
}
