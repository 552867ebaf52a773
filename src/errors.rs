use thiserror::Error;

use crate::wire::Stage;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("provider error: {0}")]
    Provider(String),

    /// The model answered, but not in the record shape the stage declares.
    #[error("malformed model output at stage `{stage}`: {reason}")]
    MalformedOutput {
        stage: Stage,
        reason: String,
        raw: String,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("{stage} loop still invalid after {rounds} round(s):\n{feedback}")]
    LoopExhausted {
        stage: Stage,
        rounds: usize,
        feedback: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("aborted: {0}")]
    Aborted(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
