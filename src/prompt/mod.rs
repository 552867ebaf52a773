use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::errors::{PipelineError, Result};
use crate::wire::Stage;

/// System/human template pair for one stage. `{name}` is substituted,
/// `{{` and `}}` are literal braces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTemplate {
    pub system: String,
    pub human: String,
}

/// Partial override loaded from config; missing halves keep the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateOverride {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub human: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptBook {
    templates: HashMap<Stage, StageTemplate>,
}

impl Default for PromptBook {
    fn default() -> Self {
        let templates = Stage::ALL
            .iter()
            .map(|&stage| {
                let (system, human) = builtin(stage);
                (stage, StageTemplate { system: system.to_string(), human: human.to_string() })
            })
            .collect();
        Self { templates }
    }
}

impl PromptBook {
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, TemplateOverride>) -> Result<Self> {
        for (name, o) in overrides {
            let stage = Stage::from_name(name)
                .ok_or_else(|| PipelineError::Config(format!("unknown stage `{name}` in [prompts]")))?;
            let entry = self
                .templates
                .get_mut(&stage)
                .ok_or_else(|| PipelineError::Config(format!("no template for stage `{name}`")))?;
            if let Some(system) = &o.system {
                entry.system = system.clone();
            }
            if let Some(human) = &o.human {
                entry.human = human.clone();
            }
        }
        Ok(self)
    }

    pub fn get(&self, stage: Stage) -> Result<&StageTemplate> {
        self.templates
            .get(&stage)
            .ok_or_else(|| PipelineError::Template(format!("no template for stage `{stage}`")))
    }
}

/// Substitute `{name}` placeholders. Unbound names and stray braces are errors.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let rest = &template[i + 1..];
                let end = rest
                    .find('}')
                    .ok_or_else(|| PipelineError::Template(format!("unclosed `{{` at byte {i}")))?;
                let name = rest[..end].trim();
                let value = vars
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| PipelineError::Template(format!("unbound variable `{name}`")))?;
                out.push_str(value);
                // skip the name and its closing brace
                for _ in 0..rest[..=end].chars().count() {
                    chars.next();
                }
            }
            '}' => {
                return Err(PipelineError::Template(format!("unmatched `}}` at byte {i}")));
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn builtin(stage: Stage) -> (&'static str, &'static str) {
    match stage {
        Stage::AppType => (
            r#"You classify app ideas. The possible app types are "web app", "chat app" and "document app".
A chat app is a conversation with the user; a document app mainly processes uploaded documents; everything else is a web app.
Reply with a JSON object of the form {{"app_type": "<type>"}} and nothing else."#,
            "App idea: {instruction}",
        ),
        Stage::SystemInputs => (
            "You list the inputs an app needs from its user at runtime. For each input give its name, \
its kind (text, file, chat message) and one sentence on why it is needed. Do not list secrets or API keys.",
            "App idea: {instruction}\n\nRuntime inputs:",
        ),
        Stage::Plan => (
            "You write step-by-step plans for small LLM-powered apps. Every step is one line of the form \
`N. <what happens> [task_name(inputs) ---> output: type]`.",
            "App idea: {instruction}\n\nPlan:",
        ),
        Stage::PlanWithInputs => (
            r#"You write step-by-step plans for small LLM-powered apps.
Every step is one line of the form `N. <what happens> [task_name(inputs) ---> output: type]`.
Only these task types may be used:
{task_descriptions}

Task names: {task_names}
Input and output data types:
{task_dtypes}

{helper}"#,
            "App idea: {instruction}\n\nInputs the app needs:\n{system_inputs}\n\nPlan:",
        ),
        Stage::PlanFeedback => (
            r#"You review app plans. Check that the plan fully covers the app idea, that every step's inputs exist before they are used, and that every result reaches the user.
Reply with a JSON object {{"feedback": "<what is wrong or why it is fine>", "valid": true|false}}."#,
            "App idea: {instruction}\n\nPlan:\n{plan}",
        ),
        Stage::PlanRefiner => (
            "You fix app plans using reviewer feedback. Keep the exact line format \
`N. <what happens> [task_name(inputs) ---> output: type]` and change only what the feedback asks for.",
            "App idea: {instruction}\n\nPlan:\n{plan}\n\nFeedback:\n{feedback}\n\nFixed plan:",
        ),
        Stage::Tasks => (
            r#"You turn an app plan into a JSON array of tasks, one per plan step, in order.
Each task is an object with the keys "step", "task_type", "task_name", "input_key", "input_data_type", "output_key", "output_data_type", "description".
"input_key" is "none", a key, or a list of keys produced by earlier tasks.
Available task types:
{task_descriptions}

Task names: {task_names}"#,
            "App idea: {instruction}\n\nPlan:\n{plan}\n\nTasks:",
        ),
        Stage::RefineTasks => (
            r#"You fix a JSON task list using validator feedback. Return the complete corrected JSON array with the same record keys.
Available task types:
{task_descriptions}"#,
            "App idea: {instruction}\n\nTasks:\n{tasks}\n\nFeedback:\n{feedback}\n\nCorrected tasks:",
        ),
        Stage::TaskCode => (
            r#"You write one Python function for a Streamlit {app_type}. The function implements a single task of type `{task_type}`: {task_description}
Return only the code of the function and the imports it needs."#,
            "App idea: {instruction}\n\nPlan:\n{plan}\n\nTask:\n{task}",
        ),
        Stage::Combine => (
            "You combine code snippets into a single runnable Streamlit app. Keep every snippet's behaviour, \
remove duplicate imports and wire the functions together in the order of the plan.",
            "App idea: {instruction}\n\nPlan:\n{plan}\n\nSnippets:\n{code_snippets}\n\nFull app:",
        ),
        Stage::CombineV2 => (
            "You combine Python functions into a single runnable Streamlit app. Call the functions in the \
given order, feeding each one the outputs of the earlier ones, and remove duplicate imports.",
            "Functions in order: {function_names}\n\nSnippets:\n{code_snippets}\n\nFull app:",
        ),
        Stage::Feedback => (
            "You review a Streamlit app against its idea. List concrete problems: bugs, missing features, \
unused inputs, confusing UI. Say so plainly if there are none.",
            "App idea: {instruction}\n\nCode:\n{code}\n\nReview:",
        ),
        Stage::Refine => (
            "You fix a Streamlit app using review feedback. Return the full corrected code only.",
            "App idea: {instruction}\n\nCode:\n{code}\n\nFeedback:\n{feedback}\n\nFixed code:",
        ),
        Stage::Final => (
            "You finalize a Streamlit app draft: make sure it runs top to bottom, keep secrets out of the code \
and read API keys from the environment. Return the final code only.",
            "Draft:\n{draft_code}\n\nFinal code:",
        ),
    }
}
