use std::time::Duration;

use crate::wire::{Stage, Task};

/// Hooks the pipeline calls as it advances. Everything defaults to a no-op
/// and plans are approved unless an implementation says otherwise.
pub trait Observer: Send + Sync {
    fn stage_started(&self, _stage: Stage) {}

    fn stage_finished(&self, _stage: Stage, _elapsed: Duration) {}

    fn plan_ready(&self, _plan: &str) {}

    fn tasks_ready(&self, _tasks: &[Task]) {}

    /// `valid` is `None` for free-text critiques that carry no verdict.
    fn feedback(&self, _stage: Stage, _feedback: &str, _valid: Option<bool>) {}

    fn approve_plan(&self, _plan: &str) -> bool {
        true
    }
}

pub struct NoopObserver;

impl Observer for NoopObserver {}
