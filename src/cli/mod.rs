use clap::{ArgAction, Parser};
use std::io::Read;
use std::path::PathBuf;

use crate::config::{CombineMode, Config, Exhaustion, ProviderKind};
use crate::errors::{PipelineError, Result};

/// Flags override the config file, which overrides built-in defaults.
#[derive(Parser, Debug, Default)]
#[command(name = "appgen", version, about = "Generate a small LLM-backed app from a one-line instruction")]
pub struct Args {
    /// What the app should do. Read from stdin when omitted.
    pub instruction: Option<String>,

    /// TOML or YAML config file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub root: Option<String>,

    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    #[arg(long, short)]
    pub model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub api_base: Option<String>,

    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long)]
    pub plan_rounds: Option<usize>,

    #[arg(long)]
    pub task_rounds: Option<usize>,

    #[arg(long)]
    pub code_rounds: Option<usize>,

    #[arg(long, value_enum)]
    pub on_exhausted: Option<Exhaustion>,

    #[arg(long, value_enum)]
    pub combine: Option<CombineMode>,

    #[arg(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Write the generated code here instead of stdout.
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub save_transcript: bool,

    #[arg(long, short = 'y', default_value_t = false)]
    pub auto_approve: bool,

    /// -v info, -vv debug, -vvv trace. RUST_LOG wins when set.
    #[arg(long, short, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(v) = &self.root {
            cfg.root = v.clone();
        }
        if let Some(v) = self.provider {
            cfg.provider = v;
        }
        if let Some(v) = &self.model {
            cfg.model = v.clone();
        }
        if let Some(v) = self.temperature {
            cfg.temperature = v;
        }
        if let Some(v) = &self.api_base {
            cfg.api_base = Some(v.clone());
        }
        if let Some(v) = self.timeout_secs {
            cfg.timeout_secs = v;
        }
        if let Some(v) = self.plan_rounds {
            cfg.plan_feedback_rounds = v;
        }
        if let Some(v) = self.task_rounds {
            cfg.task_repair_rounds = v;
        }
        if let Some(v) = self.code_rounds {
            cfg.code_refine_rounds = v;
        }
        if let Some(v) = self.on_exhausted {
            cfg.on_exhausted = v;
        }
        if let Some(v) = self.combine {
            cfg.combine = v;
        }
        if let Some(v) = self.concurrency {
            cfg.concurrency = v;
        }
        cfg.save_transcript |= self.save_transcript;
        cfg.auto_approve |= self.auto_approve;
    }

    pub fn instruction(&self) -> Result<String> {
        let text = match &self.instruction {
            Some(s) => s.clone(),
            None => {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            }
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(PipelineError::Config("instruction is empty".into()));
        }
        Ok(text)
    }
}

/// Plan approval reads the answer from stdin, so a piped stdin (which also
/// carries the instruction when no argument is given) needs `--auto-approve`.
pub fn check_approval(auto_approve: bool, stdin_is_terminal: bool) -> Result<()> {
    if auto_approve || stdin_is_terminal {
        return Ok(());
    }
    Err(PipelineError::Config(
        "stdin is not a terminal, so the plan cannot be confirmed interactively; pass --auto-approve (-y)".into(),
    ))
}
