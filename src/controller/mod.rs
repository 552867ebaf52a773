use std::collections::HashMap;

use crate::tasks::{DataType, TaskRegistry};
use crate::wire::{AppType, Feedback, Task};

/// Validate a decomposed task list. All three checks always run; the result
/// is valid only when every check is.
pub fn task_controller(registry: &TaskRegistry, tasks: &[Task], app: AppType) -> Feedback {
    combine([
        check_dtypes(registry, tasks),
        check_app_type_compatibility(registry, tasks, app),
        check_redundant_tasks(registry, tasks),
    ])
}

/// AND the validity flags and join the feedback with blank lines. Blank
/// lines inside a check's own text are removed so the joined feedback always
/// splits back into exactly three parts.
pub fn combine(checks: [Feedback; 3]) -> Feedback {
    let valid = checks.iter().all(|c| c.valid);
    let feedback = checks
        .iter()
        .map(|c| without_blank_lines(&c.feedback))
        .collect::<Vec<_>>()
        .join("\n\n");
    Feedback { feedback, valid }
}

fn without_blank_lines(text: &str) -> String {
    text.lines().filter(|l| !l.is_empty()).collect::<Vec<_>>().join("\n")
}

pub fn check_dtypes(registry: &TaskRegistry, tasks: &[Task]) -> Feedback {
    let mut problems = Vec::new();
    let mut produced: HashMap<&str, &str> = HashMap::new();

    for task in tasks {
        if let Some(spec) = registry.get(&task.task_type) {
            if !spec.input.accepts(&task.input_data_type) {
                problems.push(format!(
                    "Task `{}` ({}) declares input type `{}` but {} takes `{}`.",
                    task.task_name, task.step, task.input_data_type, spec.name, spec.input.as_str()
                ));
            }
            if !spec.output.accepts(&task.output_data_type) {
                problems.push(format!(
                    "Task `{}` ({}) declares output type `{}` but {} returns `{}`.",
                    task.task_name, task.step, task.output_data_type, spec.name, spec.output.as_str()
                ));
            }
        }

        for key in task.input_key.keys() {
            match produced.get(key) {
                None => problems.push(format!(
                    "Task `{}` ({}) reads `{}` which no earlier task produces.",
                    task.task_name, task.step, key
                )),
                Some(upstream) if !upstream.trim().eq_ignore_ascii_case(task.input_data_type.trim()) => {
                    let any_input = registry
                        .get(&task.task_type)
                        .map(|s| matches!(s.input, DataType::Any))
                        .unwrap_or(false);
                    if !any_input {
                        problems.push(format!(
                            "Task `{}` ({}) expects `{}` as `{}` but it is produced as `{}`.",
                            task.task_name, task.step, key, task.input_data_type, upstream
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        let out = task.output_key.trim();
        if !out.is_empty() && !out.eq_ignore_ascii_case("none") {
            produced.insert(out, task.output_data_type.as_str());
        }
    }

    if problems.is_empty() {
        Feedback::new("Data types of all tasks are compatible.", true)
    } else {
        Feedback::new(problems.join("\n"), false)
    }
}

pub fn check_app_type_compatibility(registry: &TaskRegistry, tasks: &[Task], app: AppType) -> Feedback {
    let mut problems = Vec::new();

    for task in tasks {
        if registry.get(&task.task_type).is_none() {
            problems.push(format!(
                "Task `{}` uses unknown task type `{}`. Use one of: {}.",
                task.task_name,
                task.task_type,
                registry.names(app)
            ));
        } else if !registry.allowed(app, &task.task_type) {
            problems.push(format!(
                "Task `{}` uses `{}` which is not available in a {}.",
                task.task_name, task.task_type, app
            ));
        }
    }

    if app == AppType::Chat && !tasks.iter().any(|t| t.task_type.trim() == "chat") {
        problems.push("A chat app needs at least one `chat` task to answer the user.".to_string());
    }

    if problems.is_empty() {
        Feedback::new(format!("All tasks fit a {app}."), true)
    } else {
        Feedback::new(problems.join("\n"), false)
    }
}

/// Every produced key must be read by a later task, unless the producing task
/// type shows its result to the user itself (a chat answer).
pub fn check_redundant_tasks(registry: &TaskRegistry, tasks: &[Task]) -> Feedback {
    let mut problems = Vec::new();
    let mut writers: HashMap<&str, &str> = HashMap::new();

    for (idx, task) in tasks.iter().enumerate() {
        let out = task.output_key.trim();
        if out.is_empty() || out.eq_ignore_ascii_case("none") || task.output_data_type.trim() == "none" {
            continue;
        }
        if let Some(first) = writers.insert(out, task.task_name.as_str()) {
            problems.push(format!(
                "Tasks `{}` and `{}` both produce `{}`.",
                first, task.task_name, out
            ));
        }
        let consumed = tasks[idx + 1..].iter().any(|later| later.input_key.keys().contains(&out));
        if !consumed && !registry.is_terminal(&task.task_type) {
            problems.push(format!(
                "Task `{}` produces `{}` but no later task uses it.",
                task.task_name, out
            ));
        }
    }

    if problems.is_empty() {
        Feedback::new("No redundant tasks.", true)
    } else {
        Feedback::new(problems.join("\n"), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::InputKey;

    fn task(step: u32, ty: &str, input: InputKey, in_ty: &str, out: &str, out_ty: &str) -> Task {
        Task {
            step,
            task_type: ty.to_string(),
            task_name: format!("step_{step}"),
            input_key: input,
            input_data_type: in_ty.to_string(),
            output_key: out.to_string(),
            output_data_type: out_ty.to_string(),
            description: String::new(),
        }
    }

    fn one(k: &str) -> InputKey {
        InputKey::One(k.to_string())
    }

    fn poem_app() -> Vec<Task> {
        vec![
            task(1, "ui_input_text", one("none"), "none", "topic", "string"),
            task(2, "prompt_template", one("topic"), "string", "poem", "string"),
            task(3, "ui_output_text", one("poem"), "string", "none", "none"),
        ]
    }

    #[test]
    fn combine_ands_and_joins() {
        let out = combine([
            Feedback::new("ok", true),
            Feedback::new("bad type", false),
            Feedback::new("ok", true),
        ]);
        assert!(!out.valid);
        assert_eq!(out.feedback, "ok\n\nbad type\n\nok");
    }

    #[test]
    fn combine_always_has_two_separators() {
        for flags in [[true, true, true], [false, false, false], [true, false, true]] {
            let out = combine(flags.map(|v| Feedback::new(if v { "fine" } else { "broken" }, v)));
            assert_eq!(out.feedback.matches("\n\n").count(), 2);
            assert_eq!(out.valid, flags.iter().all(|f| *f));
        }

        let out = combine([
            Feedback::new("\n\nleading", false),
            Feedback::new("a\n\n\nb\r\n\r\nc\n", false),
            Feedback::new("", true),
        ]);
        assert_eq!(out.feedback.matches("\n\n").count(), 2);
        assert_eq!(out.feedback.split("\n\n").count(), 3);
    }

    #[test]
    fn blank_lines_in_task_names_keep_three_parts() {
        let reg = TaskRegistry::default();
        let mut tasks = poem_app();
        tasks[0].task_name = "get\n\ntopic".into();
        tasks[1].input_key = one("ghost");
        let fb = task_controller(&reg, &tasks, AppType::Web);
        assert!(!fb.valid);
        assert_eq!(fb.feedback.matches("\n\n").count(), 2);
    }

    #[test]
    fn canonical_chat_app_passes() {
        let reg = TaskRegistry::default();
        let mut answer = task(2, "chat", one("msg"), "string", "reply", "string");
        answer.task_name = "answer".into();
        let tasks = vec![task(1, "ui_input_chat", one("none"), "none", "msg", "string"), answer];
        let fb = task_controller(&reg, &tasks, AppType::Chat);
        assert!(fb.valid, "{}", fb.feedback);
        assert!(fb.feedback.ends_with("No redundant tasks."));
    }

    #[test]
    fn valid_web_app_passes() {
        let reg = TaskRegistry::default();
        let fb = task_controller(&reg, &poem_app(), AppType::Web);
        assert!(fb.valid, "{}", fb.feedback);
        assert_eq!(fb.feedback.matches("\n\n").count(), 2);
    }

    #[test]
    fn dtype_mismatch_is_reported() {
        let reg = TaskRegistry::default();
        let tasks = vec![
            task(1, "ui_input_file", one("none"), "none", "upload", "file"),
            task(2, "doc_load", one("upload"), "file", "docs", "docs"),
            task(3, "doc_to_string", one("docs"), "docs", "text", "string"),
            task(4, "ui_output_text", one("text"), "string", "none", "none"),
        ];
        let fb = check_dtypes(&reg, &tasks);
        assert!(!fb.valid);
        assert!(fb.feedback.contains("doc_load takes `path`"));
    }

    #[test]
    fn missing_producer_is_reported() {
        let reg = TaskRegistry::default();
        let tasks = vec![task(1, "ui_output_text", one("poem"), "string", "none", "none")];
        let fb = check_dtypes(&reg, &tasks);
        assert!(!fb.valid);
        assert!(fb.feedback.contains("no earlier task produces"));
    }

    #[test]
    fn prompt_template_accepts_mixed_inputs() {
        let reg = TaskRegistry::default();
        let tasks = vec![
            task(1, "ui_input_file", one("none"), "none", "upload", "file"),
            task(2, "path_to_file", one("upload"), "file", "path", "path"),
            task(3, "ui_input_text", one("none"), "none", "question", "string"),
            task(
                4,
                "prompt_template",
                InputKey::Many(vec!["path".into(), "question".into()]),
                "string",
                "answer",
                "string",
            ),
        ];
        assert!(check_dtypes(&reg, &tasks).valid);
    }

    #[test]
    fn chat_task_in_web_app_is_incompatible() {
        let reg = TaskRegistry::default();
        let tasks = vec![
            task(1, "ui_input_chat", one("none"), "none", "msg", "string"),
            task(2, "chat", one("msg"), "string", "reply", "string"),
        ];
        let fb = check_app_type_compatibility(&reg, &tasks, AppType::Web);
        assert!(!fb.valid);
        assert!(fb.feedback.contains("not available in a web app"));
        assert!(check_app_type_compatibility(&reg, &tasks, AppType::Chat).valid);
    }

    #[test]
    fn chat_app_without_chat_task_fails() {
        let reg = TaskRegistry::default();
        let fb = check_app_type_compatibility(&reg, &poem_app()[..2], AppType::Chat);
        assert!(!fb.valid);
        assert!(fb.feedback.contains("at least one `chat` task"));
    }

    #[test]
    fn unknown_task_type_is_incompatible() {
        let reg = TaskRegistry::default();
        let tasks = vec![task(1, "send_email", one("none"), "none", "none", "none")];
        let fb = check_app_type_compatibility(&reg, &tasks, AppType::Web);
        assert!(fb.feedback.contains("unknown task type `send_email`"));
    }

    #[test]
    fn unused_output_is_redundant() {
        let mut tasks = poem_app();
        tasks.insert(1, task(2, "ui_input_text", one("none"), "none", "mood", "string"));
        let fb = check_redundant_tasks(&TaskRegistry::default(), &tasks);
        assert!(!fb.valid);
        assert!(fb.feedback.contains("`mood` but no later task uses it"));
    }

    #[test]
    fn duplicate_writer_is_redundant() {
        let tasks = vec![
            task(1, "ui_input_text", one("none"), "none", "topic", "string"),
            task(2, "ui_input_text", one("none"), "none", "topic", "string"),
            task(3, "ui_output_text", one("topic"), "string", "none", "none"),
        ];
        let fb = check_redundant_tasks(&TaskRegistry::default(), &tasks);
        assert!(fb.feedback.contains("both produce `topic`"));
    }

    #[test]
    fn all_checks_run_even_when_first_fails() {
        let reg = TaskRegistry::default();
        let tasks = vec![task(1, "ui_input_chat", one("ghost"), "string", "msg", "string")];
        let fb = task_controller(&reg, &tasks, AppType::Web);
        assert!(!fb.valid);
        let parts: Vec<&str> = fb.feedback.split("\n\n").collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].contains("no earlier task produces"));
        assert!(parts[1].contains("not available"));
        assert!(parts[2].contains("no later task uses it"));
    }
}
