use std::fmt::Write;

use crate::wire::AppType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    None,
    String,
    File,
    Path,
    Docs,
    /// Accepts any upstream datatype.
    Any,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::None => "none",
            DataType::String => "string",
            DataType::File => "file",
            DataType::Path => "path",
            DataType::Docs => "docs",
            DataType::Any => "*",
        }
    }

    /// `declared` is what a task record claims; `*` on our side accepts anything.
    pub fn accepts(&self, declared: &str) -> bool {
        matches!(self, DataType::Any) || self.as_str().eq_ignore_ascii_case(declared.trim())
    }
}

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input: DataType,
    pub output: DataType,
    /// Shows its result to the user itself, so its output needs no reader.
    pub terminal: bool,
}

const BUILTIN: &[TaskSpec] = &[
    TaskSpec {
        name: "ui_input_text",
        description: "Gets a text input from the user through a text field.",
        input: DataType::None,
        output: DataType::String,
        terminal: false,
    },
    TaskSpec {
        name: "ui_input_file",
        description: "Gets a file upload from the user.",
        input: DataType::None,
        output: DataType::File,
        terminal: false,
    },
    TaskSpec {
        name: "ui_input_chat",
        description: "Gets the next chat message from the user through a chat input box.",
        input: DataType::None,
        output: DataType::String,
        terminal: false,
    },
    TaskSpec {
        name: "ui_output_text",
        description: "Shows a text value to the user.",
        input: DataType::String,
        output: DataType::None,
        terminal: true,
    },
    TaskSpec {
        name: "prompt_template",
        description: "Generates text with an LLM from a prompt built out of its inputs.",
        input: DataType::Any,
        output: DataType::String,
        terminal: false,
    },
    TaskSpec {
        name: "path_to_file",
        description: "Stores an uploaded file on disk and returns its path.",
        input: DataType::File,
        output: DataType::Path,
        terminal: false,
    },
    TaskSpec {
        name: "doc_load",
        description: "Loads a document from a file path into a list of documents.",
        input: DataType::Path,
        output: DataType::Docs,
        terminal: false,
    },
    TaskSpec {
        name: "doc_to_string",
        description: "Joins a list of documents into a single string.",
        input: DataType::Docs,
        output: DataType::String,
        terminal: false,
    },
    TaskSpec {
        name: "summarize",
        description: "Summarizes a list of documents with an LLM.",
        input: DataType::Docs,
        output: DataType::String,
        terminal: false,
    },
    TaskSpec {
        name: "chat",
        description: "Answers a chat message with an LLM, keeping conversation memory.",
        input: DataType::String,
        output: DataType::String,
        terminal: true,
    },
    TaskSpec {
        name: "python_coder",
        description: "Writes and runs Python code that computes an answer from its inputs.",
        input: DataType::Any,
        output: DataType::String,
        terminal: false,
    },
];

const WEB_VOCAB: &[&str] = &[
    "ui_input_text",
    "ui_input_file",
    "ui_output_text",
    "prompt_template",
    "path_to_file",
    "doc_load",
    "doc_to_string",
    "summarize",
    "python_coder",
];

const CHAT_VOCAB: &[&str] = &[
    "ui_input_chat",
    "chat",
    "ui_input_text",
    "ui_input_file",
    "prompt_template",
    "path_to_file",
    "doc_load",
    "doc_to_string",
];

const DOCUMENT_VOCAB: &[&str] = &[
    "ui_input_file",
    "ui_input_text",
    "path_to_file",
    "doc_load",
    "doc_to_string",
    "summarize",
    "prompt_template",
    "ui_output_text",
];

/// Task types known to the pipeline and the subset usable per app type.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    specs: Vec<TaskSpec>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self { specs: BUILTIN.to_vec() }
    }
}

impl TaskRegistry {
    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.specs.iter().find(|s| s.name == name.trim())
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.get(name).map(|s| s.terminal).unwrap_or(false)
    }

    pub fn allowed(&self, app: AppType, name: &str) -> bool {
        vocabulary(app).contains(&name.trim())
    }

    pub fn for_app(&self, app: AppType) -> Vec<&TaskSpec> {
        vocabulary(app).iter().filter_map(|n| self.get(n)).collect()
    }

    /// `name: description` lines injected into planning prompts.
    pub fn descriptions(&self, app: AppType) -> String {
        let mut out = String::new();
        for spec in self.for_app(app) {
            let _ = writeln!(out, "{}: {}", spec.name, spec.description);
        }
        out.trim_end().to_string()
    }

    pub fn names(&self, app: AppType) -> String {
        self.for_app(app).iter().map(|s| s.name).collect::<Vec<_>>().join(", ")
    }

    /// `name: input -> output` lines.
    pub fn dtypes(&self, app: AppType) -> String {
        let mut out = String::new();
        for spec in self.for_app(app) {
            let _ = writeln!(out, "{}: {} -> {}", spec.name, spec.input.as_str(), spec.output.as_str());
        }
        out.trim_end().to_string()
    }

    pub fn plan_helper(&self, app: AppType) -> &'static str {
        match app {
            AppType::Web => {
                "The app runs once per submission: collect every input with ui_input_* tasks first, \
                 then transform, and finish each result with ui_output_text."
            }
            AppType::Chat => {
                "The app is a conversation: read each message with ui_input_chat and answer it with \
                 a chat task. Chat replies are rendered by the chat itself, so no ui_output_text is needed."
            }
            AppType::Document => {
                "The app works on uploaded documents: ui_input_file -> path_to_file -> doc_load, then \
                 turn the documents into text with doc_to_string or summarize before showing results."
            }
        }
    }
}

fn vocabulary(app: AppType) -> &'static [&'static str] {
    match app {
        AppType::Web => WEB_VOCAB,
        AppType::Chat => CHAT_VOCAB,
        AppType::Document => DOCUMENT_VOCAB,
    }
}
