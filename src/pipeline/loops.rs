use tracing::{info, warn};

use super::Pipeline;
use crate::config::{Config, Exhaustion};
use crate::controller::task_controller;
use crate::errors::{PipelineError, Result};
use crate::wire::{AppType, Stage, Task};

/// Bound for one feedback loop. `max_rounds == 0` turns the loop off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    pub max_rounds: usize,
    pub on_exhausted: Exhaustion,
}

impl LoopPolicy {
    pub fn new(max_rounds: usize, on_exhausted: Exhaustion) -> Self {
        Self { max_rounds, on_exhausted }
    }

    pub fn disabled() -> Self {
        Self::new(0, Exhaustion::AcceptBestEffort)
    }

    pub fn plan_feedback(cfg: &Config) -> Self {
        Self::new(cfg.plan_feedback_rounds, cfg.on_exhausted)
    }

    pub fn task_repair(cfg: &Config) -> Self {
        Self::new(cfg.task_repair_rounds, cfg.on_exhausted)
    }

    fn exhausted<T>(&self, stage: Stage, feedback: String, latest: T) -> Result<T> {
        match self.on_exhausted {
            Exhaustion::AcceptBestEffort => {
                warn!(%stage, rounds = self.max_rounds, %feedback, "loop bound reached; continuing with latest output");
                Ok(latest)
            }
            Exhaustion::Fail => Err(PipelineError::LoopExhausted {
                stage,
                rounds: self.max_rounds,
                feedback,
            }),
        }
    }
}

impl<'a> Pipeline<'a> {
    /// Review the plan and regenerate it from the review until it is judged
    /// valid or `policy.max_rounds` regenerations have been spent.
    pub async fn refine_plan_loop(&self, instruction: &str, plan: String, policy: &LoopPolicy) -> Result<String> {
        if policy.max_rounds == 0 {
            return Ok(plan);
        }
        let mut plan = plan;
        let mut rounds = 0;
        loop {
            let fb = self.plan_feedback(instruction, &plan).await?;
            self.observer().feedback(Stage::PlanFeedback, &fb.feedback, Some(fb.valid));
            if fb.valid {
                info!(rounds, "plan accepted");
                return Ok(plan);
            }
            if rounds == policy.max_rounds {
                return policy.exhausted(Stage::PlanRefiner, fb.feedback, plan);
            }
            plan = self.plan_refiner(instruction, &plan, &fb.feedback).await?;
            rounds += 1;
        }
    }

    /// Validate tasks locally and regenerate the whole list from the
    /// controller's feedback, bounded like `refine_plan_loop`.
    pub async fn repair_tasks_loop(
        &self,
        instruction: &str,
        tasks: Vec<Task>,
        app_type: AppType,
        policy: &LoopPolicy,
    ) -> Result<Vec<Task>> {
        if policy.max_rounds == 0 {
            return Ok(tasks);
        }
        let mut tasks = tasks;
        let mut rounds = 0;
        loop {
            let fb = task_controller(self.registry, &tasks, app_type);
            self.observer().feedback(Stage::RefineTasks, &fb.feedback, Some(fb.valid));
            if fb.valid {
                info!(rounds, count = tasks.len(), "tasks accepted");
                return Ok(tasks);
            }
            if rounds == policy.max_rounds {
                return policy.exhausted(Stage::RefineTasks, fb.feedback, tasks);
            }
            tasks = self.refine_tasks(instruction, &tasks, &fb.feedback, app_type).await?;
            rounds += 1;
        }
    }

    /// Critique and rewrite the code `rounds` times. Critiques carry no
    /// verdict, so every round runs.
    pub async fn refine_code_loop(&self, instruction: &str, code: String, rounds: usize) -> Result<String> {
        let mut code = code;
        for round in 0..rounds {
            let critique = self.feedback(instruction, &code).await?;
            self.observer().feedback(Stage::Feedback, &critique, None);
            code = self.refine(instruction, &code, &critique).await?;
            info!(round = round + 1, len = code.len(), "code refined");
        }
        Ok(code)
    }
}
