use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::cleanup::refine_code;
use crate::config::{CombineMode, Config};
use crate::controller;
use crate::dispatch::Dispatcher;
use crate::errors::{PipelineError, Result};
use crate::plan::PlanRefiner;
use crate::tasks::TaskRegistry;
use crate::wire::{self, AppType, Feedback, Stage, Task};

pub mod loops;
pub mod observer;

pub use loops::LoopPolicy;
use observer::Observer;

/// Knobs for an end-to-end `run`.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub plan_feedback: LoopPolicy,
    pub task_repair: LoopPolicy,
    pub code_refine_rounds: usize,
    pub combine: CombineMode,
}

impl RunOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            plan_feedback: LoopPolicy::plan_feedback(cfg),
            task_repair: LoopPolicy::task_repair(cfg),
            code_refine_rounds: cfg.code_refine_rounds,
            combine: cfg.combine,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub app_type: AppType,
    pub system_inputs: String,
    pub plan: String,
    pub tasks: Vec<Task>,
    pub snippets: Vec<String>,
    pub draft: String,
    pub code: String,
}

/// The LLM stages, each one call-and-parse step over an explicitly passed
/// dispatcher.
pub struct Pipeline<'a> {
    dispatcher: Dispatcher<'a>,
    registry: &'a TaskRegistry,
    refiner: PlanRefiner,
    concurrency: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(dispatcher: Dispatcher<'a>, registry: &'a TaskRegistry) -> Self {
        Self {
            dispatcher,
            registry,
            refiner: PlanRefiner::default(),
            concurrency: 4,
        }
    }

    pub fn with_refiner(mut self, refiner: PlanRefiner) -> Self {
        self.refiner = refiner;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    fn observer(&self) -> &'a dyn Observer {
        self.dispatcher.observer()
    }

    // ===== CLASSIFY & INPUTS =====

    pub async fn app_type(&self, instruction: &str) -> Result<AppType> {
        let raw = self
            .dispatcher
            .dispatch(Stage::AppType, &[("instruction", instruction)])
            .await?;
        let app = wire::decode_app_type(&raw)?;
        info!(%app, "app type");
        Ok(app)
    }

    pub async fn system_inputs(&self, instruction: &str) -> Result<String> {
        self.dispatcher
            .dispatch(Stage::SystemInputs, &[("instruction", instruction)])
            .await
    }

    // ===== PLAN =====

    pub async fn plan(&self, instruction: &str) -> Result<String> {
        let raw = self
            .dispatcher
            .dispatch(Stage::Plan, &[("instruction", instruction)])
            .await?;
        self.refined(Stage::Plan, &raw)
    }

    pub async fn plan_with_inputs(&self, instruction: &str, system_inputs: &str, app_type: AppType) -> Result<String> {
        let descriptions = self.registry.descriptions(app_type);
        let names = self.registry.names(app_type);
        let dtypes = self.registry.dtypes(app_type);
        let raw = self
            .dispatcher
            .dispatch(
                Stage::PlanWithInputs,
                &[
                    ("instruction", instruction),
                    ("system_inputs", system_inputs),
                    ("helper", self.registry.plan_helper(app_type)),
                    ("task_descriptions", descriptions.as_str()),
                    ("task_names", names.as_str()),
                    ("task_dtypes", dtypes.as_str()),
                ],
            )
            .await?;
        self.refined(Stage::PlanWithInputs, &raw)
    }

    pub async fn plan_feedback(&self, instruction: &str, plan: &str) -> Result<Feedback> {
        let raw = self
            .dispatcher
            .dispatch(Stage::PlanFeedback, &[("instruction", instruction), ("plan", plan)])
            .await?;
        wire::decode_feedback(Stage::PlanFeedback, &raw)
    }

    pub async fn plan_refiner(&self, instruction: &str, plan: &str, feedback: &str) -> Result<String> {
        let raw = self
            .dispatcher
            .dispatch(
                Stage::PlanRefiner,
                &[("instruction", instruction), ("plan", plan), ("feedback", feedback)],
            )
            .await?;
        self.refined(Stage::PlanRefiner, &raw)
    }

    /// Run the line refiner; a plan with no call lines left cannot feed the
    /// task stage.
    fn refined(&self, stage: Stage, raw: &str) -> Result<String> {
        let out = self.refiner.refine(raw);
        for line in &out.dropped {
            warn!(%stage, line = %line, "plan line without a task call dropped");
        }
        if out.text.is_empty() {
            return Err(PipelineError::MalformedOutput {
                stage,
                reason: "no plan line carries a task call".into(),
                raw: raw.to_string(),
            });
        }
        Ok(out.text)
    }

    // ===== TASKS =====

    pub async fn tasks(&self, instruction: &str, plan: &str, app_type: AppType) -> Result<Vec<Task>> {
        let descriptions = self.registry.descriptions(app_type);
        let names = self.registry.names(app_type);
        let raw = self
            .dispatcher
            .dispatch(
                Stage::Tasks,
                &[
                    ("instruction", instruction),
                    ("plan", plan),
                    ("task_descriptions", descriptions.as_str()),
                    ("task_names", names.as_str()),
                ],
            )
            .await?;
        let tasks = wire::decode_tasks(Stage::Tasks, &raw)?;
        info!(count = tasks.len(), "tasks decoded");
        Ok(tasks)
    }

    pub fn task_controller(&self, tasks: &[Task], app_type: AppType) -> Feedback {
        controller::task_controller(self.registry, tasks, app_type)
    }

    pub async fn refine_tasks(
        &self,
        instruction: &str,
        tasks: &[Task],
        feedback: &str,
        app_type: AppType,
    ) -> Result<Vec<Task>> {
        let descriptions = self.registry.descriptions(app_type);
        let tasks_json = to_json(tasks)?;
        let raw = self
            .dispatcher
            .dispatch(
                Stage::RefineTasks,
                &[
                    ("instruction", instruction),
                    ("tasks", tasks_json.as_str()),
                    ("feedback", feedback),
                    ("task_descriptions", descriptions.as_str()),
                ],
            )
            .await?;
        wire::decode_tasks(Stage::RefineTasks, &raw)
    }

    // ===== CODE =====

    pub async fn task_code(&self, instruction: &str, plan: &str, task: &Task, app_type: AppType) -> Result<String> {
        let description = self
            .registry
            .get(&task.task_type)
            .map(|s| s.description)
            .unwrap_or_default();
        let task_json = to_json(task)?;
        let app_label = app_type.label();
        let raw = self
            .dispatcher
            .dispatch(
                Stage::TaskCode,
                &[
                    ("instruction", instruction),
                    ("plan", plan),
                    ("task", task_json.as_str()),
                    ("task_type", task.task_type.as_str()),
                    ("task_description", description),
                    ("app_type", app_label),
                ],
            )
            .await?;
        Ok(refine_code(&raw))
    }

    /// One `task_code` call per task, at most `concurrency` in flight,
    /// results in task order.
    pub async fn generate_code(
        &self,
        instruction: &str,
        plan: &str,
        tasks: &[Task],
        app_type: AppType,
    ) -> Result<Vec<String>> {
        stream::iter(tasks.iter().map(|t| self.task_code(instruction, plan, t, app_type)))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    pub async fn combine(&self, instruction: &str, code_snippets: &str, plan: &str) -> Result<String> {
        let raw = self
            .dispatcher
            .dispatch(
                Stage::Combine,
                &[("instruction", instruction), ("code_snippets", code_snippets), ("plan", plan)],
            )
            .await?;
        Ok(refine_code(&raw))
    }

    pub async fn combine_v2(&self, code_snippets: &str, function_names: &str) -> Result<String> {
        let raw = self
            .dispatcher
            .dispatch(
                Stage::CombineV2,
                &[("code_snippets", code_snippets), ("function_names", function_names)],
            )
            .await?;
        Ok(refine_code(&raw))
    }

    pub async fn feedback(&self, instruction: &str, code: &str) -> Result<String> {
        self.dispatcher
            .dispatch(Stage::Feedback, &[("instruction", instruction), ("code", code)])
            .await
    }

    pub async fn refine(&self, instruction: &str, code: &str, feedback: &str) -> Result<String> {
        let raw = self
            .dispatcher
            .dispatch(
                Stage::Refine,
                &[("instruction", instruction), ("code", code), ("feedback", feedback)],
            )
            .await?;
        Ok(refine_code(&raw))
    }

    pub async fn final_code(&self, draft_code: &str) -> Result<String> {
        let raw = self
            .dispatcher
            .dispatch(Stage::Final, &[("draft_code", draft_code)])
            .await?;
        Ok(refine_code(&raw))
    }

    // ===== END TO END =====

    pub async fn run(&self, instruction: &str, opts: &RunOptions) -> Result<RunOutput> {
        let app_type = self.app_type(instruction).await?;
        let system_inputs = self.system_inputs(instruction).await?;

        let plan = self.plan_with_inputs(instruction, &system_inputs, app_type).await?;
        let plan = self.refine_plan_loop(instruction, plan, &opts.plan_feedback).await?;
        self.observer().plan_ready(&plan);
        if !self.observer().approve_plan(&plan) {
            return Err(PipelineError::Aborted("plan was not approved".into()));
        }

        let tasks = self.tasks(instruction, &plan, app_type).await?;
        let tasks = self.repair_tasks_loop(instruction, tasks, app_type, &opts.task_repair).await?;
        self.observer().tasks_ready(&tasks);

        let snippets = self.generate_code(instruction, &plan, &tasks, app_type).await?;
        let listing = snippet_listing(&tasks, &snippets);
        let draft = match opts.combine {
            CombineMode::Plan => self.combine(instruction, &listing, &plan).await?,
            CombineMode::Functions => self.combine_v2(&listing, &function_names(&tasks)).await?,
        };

        let draft = self.refine_code_loop(instruction, draft, opts.code_refine_rounds).await?;
        let code = self.final_code(&draft).await?;
        info!(app = %app_type, tasks = tasks.len(), bytes = code.len(), "run finished");

        Ok(RunOutput {
            app_type,
            system_inputs,
            plan,
            tasks,
            snippets,
            draft,
            code,
        })
    }
}

/// Snippets labelled with the task they implement, in task order.
pub fn snippet_listing(tasks: &[Task], snippets: &[String]) -> String {
    tasks
        .iter()
        .zip(snippets)
        .map(|(t, code)| format!("# Step {}: {} ({})\n{}\n", t.step, t.task_name, t.task_type, code))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn function_names(tasks: &[Task]) -> String {
    tasks.iter().map(|t| t.task_name.as_str()).collect::<Vec<_>>().join(", ")
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::config::Exhaustion;
    use crate::prompt::PromptBook;
    use crate::provider::scripted::ScriptedProvider;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn pipeline<'a>(p: &'a ScriptedProvider, book: &'a PromptBook, reg: &'a TaskRegistry) -> Pipeline<'a> {
        Pipeline::new(Dispatcher::new(p, book, "test-model", 0.0), reg)
    }

    fn no_loops() -> RunOptions {
        RunOptions {
            plan_feedback: LoopPolicy::disabled(),
            task_repair: LoopPolicy::disabled(),
            code_refine_rounds: 0,
            combine: CombineMode::Plan,
        }
    }

    #[tokio::test]
    async fn app_type_prose_propagates_as_malformed() {
        let p = ScriptedProvider::new().reply(Stage::AppType, "It is a web app.");
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let err = pipeline(&p, &book, &reg).app_type("poem").await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { stage: Stage::AppType, .. }));
    }

    #[tokio::test]
    async fn plan_with_inputs_injects_vocabulary_and_refines() {
        let p = ScriptedProvider::new().reply(Stage::PlanWithInputs, PLAN);
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let plan = pipeline(&p, &book, &reg)
            .plan_with_inputs("poem", INPUTS, AppType::Web)
            .await
            .unwrap();
        assert!(plan.starts_with("1. Ask for a topic"));
        assert_eq!(plan.lines().count(), 3);

        let sent = &p.requests()[0];
        assert!(sent.system.contains("ui_output_text: string -> none"));
        assert!(!sent.system.contains("ui_input_chat"));
        assert!(sent.human.contains(INPUTS));
    }

    #[tokio::test]
    async fn plan_without_call_lines_is_malformed() {
        let p = ScriptedProvider::new().reply(Stage::Plan, "1. think\n2. write");
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let err = pipeline(&p, &book, &reg).plan("poem").await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { stage: Stage::Plan, .. }));
    }

    #[tokio::test]
    async fn code_stages_are_cleaned() {
        let p = ScriptedProvider::new()
            .reply(Stage::Combine, "```python\nimport streamlit as st\n```")
            .reply(Stage::CombineV2, "```python\nmain()\n```")
            .reply(Stage::Refine, "```\nfixed = True\n```")
            .reply(Stage::Final, "Final:\n```python\nprint('done')\n```");
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let pl = pipeline(&p, &book, &reg);
        assert_eq!(pl.combine("i", "s", "p").await.unwrap(), "import streamlit as st");
        assert_eq!(pl.combine_v2("s", "a, b").await.unwrap(), "main()");
        assert_eq!(pl.refine("i", "c", "f").await.unwrap(), "fixed = True");
        assert_eq!(pl.final_code("d").await.unwrap(), "print('done')");
    }

    #[tokio::test]
    async fn generate_code_keeps_task_order() {
        let p = ScriptedProvider::new()
            .reply(Stage::TaskCode, "def get_topic(): ...")
            .reply(Stage::TaskCode, "def write_poem(topic): ...")
            .reply(Stage::TaskCode, "def show_poem(poem): ...");
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let tasks = wire::decode_tasks(Stage::Tasks, TASKS).unwrap();
        let pl = pipeline(&p, &book, &reg).with_concurrency(2);
        let out = pl.generate_code("poem", "plan", &tasks, AppType::Web).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out[0].contains("get_topic"));
        assert!(out[2].contains("show_poem"));

        let sent = p.requests();
        assert!(sent[0].system.contains("`ui_input_text`"));
        assert!(sent[1].human.contains("\"task_name\": \"write_poem\""));
    }

    #[tokio::test]
    async fn plan_loop_regenerates_until_valid() {
        let p = ScriptedProvider::new()
            .reply(Stage::PlanFeedback, r#"{"feedback": "step 3 missing", "valid": false}"#)
            .reply(Stage::PlanRefiner, "1. a [x(y)]\n2. b [z(w)]")
            .reply(Stage::PlanFeedback, r#"{"feedback": "fine", "valid": true}"#);
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let plan = pipeline(&p, &book, &reg)
            .refine_plan_loop("i", "1. a [x(y)]".into(), &LoopPolicy::new(3, Exhaustion::Fail))
            .await
            .unwrap();
        assert_eq!(plan, "1. a [x(y)]\n2. b [z(w)]");
        assert_eq!(p.calls(Stage::PlanFeedback), 2);
        assert!(p.requests()[1].human.contains("step 3 missing"));
    }

    #[tokio::test]
    async fn plan_loop_fails_when_bound_reached() {
        let bad = r#"{"feedback": "still wrong", "valid": false}"#;
        let p = ScriptedProvider::new()
            .reply(Stage::PlanFeedback, bad)
            .reply(Stage::PlanRefiner, "1. b [x(y)]")
            .reply(Stage::PlanFeedback, bad);
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let err = pipeline(&p, &book, &reg)
            .refine_plan_loop("i", "1. a [x(y)]".into(), &LoopPolicy::new(1, Exhaustion::Fail))
            .await
            .unwrap_err();
        match err {
            PipelineError::LoopExhausted { stage, rounds, feedback } => {
                assert_eq!(stage, Stage::PlanRefiner);
                assert_eq!(rounds, 1);
                assert_eq!(feedback, "still wrong");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn plan_loop_best_effort_keeps_latest() {
        let bad = r#"{"feedback": "meh", "valid": false}"#;
        let p = ScriptedProvider::new()
            .reply(Stage::PlanFeedback, bad)
            .reply(Stage::PlanRefiner, "1. newer [x(y)]")
            .reply(Stage::PlanFeedback, bad);
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let plan = pipeline(&p, &book, &reg)
            .refine_plan_loop("i", "1. old [x(y)]".into(), &LoopPolicy::new(1, Exhaustion::AcceptBestEffort))
            .await
            .unwrap();
        assert_eq!(plan, "1. newer [x(y)]");
    }

    #[tokio::test]
    async fn disabled_loop_makes_no_calls() {
        let p = ScriptedProvider::new();
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let pl = pipeline(&p, &book, &reg);
        let plan = pl.refine_plan_loop("i", "1. a [x(y)]".into(), &LoopPolicy::disabled()).await.unwrap();
        assert_eq!(plan, "1. a [x(y)]");
        let code = pl.refine_code_loop("i", "x = 1".into(), 0).await.unwrap();
        assert_eq!(code, "x = 1");
        assert!(p.requests().is_empty());
    }

    #[tokio::test]
    async fn task_loop_repairs_broken_list() {
        let p = ScriptedProvider::new().reply(Stage::RefineTasks, TASKS);
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let broken = wire::decode_tasks(Stage::Tasks, BROKEN_TASKS).unwrap();
        let fixed = pipeline(&p, &book, &reg)
            .repair_tasks_loop("poem", broken, AppType::Web, &LoopPolicy::new(2, Exhaustion::Fail))
            .await
            .unwrap();
        assert_eq!(fixed.len(), 3);
        assert_eq!(p.calls(Stage::RefineTasks), 1);
        let sent = &p.requests()[0];
        assert!(sent.human.contains("no earlier task produces"));
        assert!(sent.human.contains("\"task_name\": \"show_poem\""));
    }

    #[tokio::test]
    async fn task_loop_gives_up_under_fail_policy() {
        let p = ScriptedProvider::new()
            .reply(Stage::RefineTasks, BROKEN_TASKS)
            .reply(Stage::RefineTasks, BROKEN_TASKS);
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let broken = wire::decode_tasks(Stage::Tasks, BROKEN_TASKS).unwrap();
        let err = pipeline(&p, &book, &reg)
            .repair_tasks_loop("poem", broken, AppType::Web, &LoopPolicy::new(2, Exhaustion::Fail))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LoopExhausted { stage: Stage::RefineTasks, rounds: 2, .. }));
        assert_eq!(p.remaining(Stage::RefineTasks), 0);
    }

    #[tokio::test]
    async fn code_loop_runs_every_round() {
        let p = ScriptedProvider::new()
            .reply(Stage::Feedback, "add a title")
            .reply(Stage::Refine, "st.title('x')")
            .reply(Stage::Feedback, "add a footer")
            .reply(Stage::Refine, "st.title('x')\nst.caption('y')");
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let code = pipeline(&p, &book, &reg)
            .refine_code_loop("i", "pass".into(), 2)
            .await
            .unwrap();
        assert_eq!(code, "st.title('x')\nst.caption('y')");
        assert!(p.requests()[3].human.contains("add a footer"));
    }

    struct Rejecting;
    impl Observer for Rejecting {
        fn approve_plan(&self, _plan: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn declined_plan_aborts_before_tasks() {
        let p = ScriptedProvider::new()
            .reply(Stage::AppType, APP_TYPE)
            .reply(Stage::SystemInputs, INPUTS)
            .reply(Stage::PlanWithInputs, PLAN);
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let d = Dispatcher::new(&p, &book, "m", 0.0).with_observer(&Rejecting);
        let err = Pipeline::new(d, &reg).run("poem", &no_loops()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Aborted(_)));
        assert_eq!(p.calls(Stage::Tasks), 0);
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Observer for Recorder {
        fn stage_finished(&self, stage: Stage, _elapsed: Duration) {
            self.events.lock().push(stage.to_string());
        }
        fn tasks_ready(&self, tasks: &[Task]) {
            self.events.lock().push(format!("tasks:{}", tasks.len()));
        }
    }

    #[tokio::test]
    async fn run_walks_every_stage_in_order() {
        let p = ScriptedProvider::new()
            .reply(Stage::AppType, APP_TYPE)
            .reply(Stage::SystemInputs, INPUTS)
            .reply(Stage::PlanWithInputs, PLAN)
            .reply(Stage::Tasks, TASKS)
            .reply(Stage::TaskCode, "def get_topic(): ...")
            .reply(Stage::TaskCode, "def write_poem(topic): ...")
            .reply(Stage::TaskCode, "def show_poem(poem): ...")
            .reply(Stage::CombineV2, "```python\napp()\n```")
            .reply(Stage::Final, "```python\napp()  # final\n```");
        let (book, reg) = (PromptBook::default(), TaskRegistry::default());
        let rec = Recorder::default();
        let d = Dispatcher::new(&p, &book, "m", 0.0).with_observer(&rec);
        let opts = RunOptions { combine: CombineMode::Functions, ..no_loops() };

        let out = Pipeline::new(d, &reg).with_concurrency(1).run("poem", &opts).await.unwrap();
        assert_eq!(out.app_type, AppType::Web);
        assert_eq!(out.tasks.len(), 3);
        assert_eq!(out.draft, "app()");
        assert_eq!(out.code, "app()  # final");

        let combine_req = p.requests().into_iter().find(|r| r.stage == Stage::CombineV2).unwrap();
        assert!(combine_req.human.contains("get_topic, write_poem, show_poem"));
        assert!(combine_req.human.contains("# Step 2: write_poem (prompt_template)"));

        let events = rec.events.lock().clone();
        assert_eq!(
            events,
            vec![
                "app_type", "system_inputs", "plan_with_inputs", "tasks", "tasks:3",
                "task_code", "task_code", "task_code", "combine_v2", "final",
            ]
        );
    }
}
