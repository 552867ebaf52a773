use regex::Regex;

use crate::errors::{PipelineError, Result};

/// Matches a bracketed call marker such as `[ui_input_text(...)...]`.
pub const DEFAULT_CALL_PATTERN: &str = r"\[[a-zA-Z0-9_]+\(.*\)";

/// Outcome of refining a raw plan: the renumbered text plus the lines that
/// were dropped because they carried no call marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefinedPlan {
    pub text: String,
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlanRefiner {
    call: Regex,
    numbering: Regex,
}

impl Default for PlanRefiner {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_PATTERN).expect("default call pattern compiles")
    }
}

impl PlanRefiner {
    pub fn new(call_pattern: &str) -> Result<Self> {
        let call = Regex::new(call_pattern)
            .map_err(|e| PipelineError::Config(format!("invalid plan call pattern: {e}")))?;
        let numbering = Regex::new(r"^\d+\.").map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self { call, numbering })
    }

    /// Keep only lines with a call marker, strip their old `N.` prefix and
    /// renumber from 1.
    pub fn refine(&self, plan: &str) -> RefinedPlan {
        let mut kept: Vec<String> = Vec::new();
        let mut dropped = Vec::new();

        for step in plan.trim().split('\n') {
            if self.call.is_match(step) {
                let current = self.numbering.replace(step.trim(), "");
                kept.push(format!("{}. {}", kept.len() + 1, current.trim()));
            } else if !step.trim().is_empty() {
                dropped.push(step.trim().to_string());
            }
        }

        RefinedPlan {
            text: kept.join("\n"),
            dropped,
        }
    }
}
