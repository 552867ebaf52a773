use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cleanup;
use crate::errors::{PipelineError, Result};

/// ========================================
/// Stage names and the chat request sent per stage
/// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AppType,
    SystemInputs,
    Plan,
    PlanWithInputs,
    PlanFeedback,
    PlanRefiner,
    Tasks,
    RefineTasks,
    TaskCode,
    Combine,
    CombineV2,
    Feedback,
    Refine,
    Final,
}

impl Stage {
    pub const ALL: [Stage; 14] = [
        Stage::AppType,
        Stage::SystemInputs,
        Stage::Plan,
        Stage::PlanWithInputs,
        Stage::PlanFeedback,
        Stage::PlanRefiner,
        Stage::Tasks,
        Stage::RefineTasks,
        Stage::TaskCode,
        Stage::Combine,
        Stage::CombineV2,
        Stage::Feedback,
        Stage::Refine,
        Stage::Final,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AppType => "app_type",
            Stage::SystemInputs => "system_inputs",
            Stage::Plan => "plan",
            Stage::PlanWithInputs => "plan_with_inputs",
            Stage::PlanFeedback => "plan_feedback",
            Stage::PlanRefiner => "plan_refiner",
            Stage::Tasks => "tasks",
            Stage::RefineTasks => "refine_tasks",
            Stage::TaskCode => "task_code",
            Stage::Combine => "combine",
            Stage::CombineV2 => "combine_v2",
            Stage::Feedback => "feedback",
            Stage::Refine => "refine",
            Stage::Final => "final",
        }
    }

    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered two-message chat request. An empty `system` is not sent.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub stage: Stage,
    pub model: String,
    pub temperature: f32,
    pub system: String,
    pub human: String,
}

/// ========================================
/// Records decoded from model output
/// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppType {
    #[serde(rename = "web app")]
    Web,
    #[serde(rename = "chat app")]
    Chat,
    #[serde(rename = "document app")]
    Document,
}

impl AppType {
    pub fn label(&self) -> &'static str {
        match self {
            AppType::Web => "web app",
            AppType::Chat => "chat app",
            AppType::Document => "document app",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppTypeReply {
    pub app_type: AppType,
}

/// `input_key` is either the literal "none", a single key, or a list of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputKey {
    One(String),
    Many(Vec<String>),
}

impl InputKey {
    pub fn keys(&self) -> Vec<&str> {
        let all: Vec<&str> = match self {
            InputKey::One(k) => vec![k.as_str()],
            InputKey::Many(ks) => ks.iter().map(String::as_str).collect(),
        };
        all.into_iter()
            .map(str::trim)
            .filter(|k| !k.is_empty() && !k.eq_ignore_ascii_case("none"))
            .collect()
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKey::One(k) => f.write_str(k),
            InputKey::Many(ks) => write!(f, "[{}]", ks.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub step: u32,
    pub task_type: String,
    pub task_name: String,
    pub input_key: InputKey,
    pub input_data_type: String,
    pub output_key: String,
    pub output_data_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback: String,
    pub valid: bool,
}

impl Feedback {
    pub fn new(feedback: impl Into<String>, valid: bool) -> Self {
        Self { feedback: feedback.into(), valid }
    }
}

/// Decode a JSON reply into `T`. Markdown fences around the JSON are
/// tolerated; anything else that does not match the record shape fails.
pub fn decode<T: DeserializeOwned>(stage: Stage, raw: &str) -> Result<T> {
    let body = cleanup::strip_fences(raw);
    if body.is_empty() {
        return Err(malformed(stage, "empty reply", raw));
    }
    serde_json::from_str::<T>(&body).map_err(|e| malformed(stage, &e.to_string(), raw))
}

pub fn decode_app_type(raw: &str) -> Result<AppType> {
    decode::<AppTypeReply>(Stage::AppType, raw).map(|r| r.app_type)
}

pub fn decode_feedback(stage: Stage, raw: &str) -> Result<Feedback> {
    decode::<Feedback>(stage, raw)
}

pub fn decode_tasks(stage: Stage, raw: &str) -> Result<Vec<Task>> {
    let tasks = decode::<Vec<Task>>(stage, raw)?;
    if tasks.is_empty() {
        return Err(malformed(stage, "task list is empty", raw));
    }
    Ok(tasks)
}

fn malformed(stage: Stage, reason: &str, raw: &str) -> PipelineError {
    PipelineError::MalformedOutput {
        stage,
        reason: reason.to_string(),
        raw: raw.to_string(),
    }
}
