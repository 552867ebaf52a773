use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info};

use crate::errors::Result;
use crate::log::{Exchange, Transcript};
use crate::pipeline::observer::{NoopObserver, Observer};
use crate::prompt::{render, PromptBook, StageTemplate};
use crate::provider::Provider;
use crate::wire::{ChatRequest, Stage};

static NOOP: NoopObserver = NoopObserver;

/// Renders a stage's template pair, sends it to the provider and hands back
/// the completion text untouched. One network call per dispatch, no retry.
pub struct Dispatcher<'a> {
    provider: &'a dyn Provider,
    prompts: &'a PromptBook,
    model: String,
    temperature: f32,
    transcript: Option<&'a Transcript>,
    observer: &'a dyn Observer,
}

impl<'a> Dispatcher<'a> {
    pub fn new(provider: &'a dyn Provider, prompts: &'a PromptBook, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            provider,
            prompts,
            model: model.into(),
            temperature,
            transcript: None,
            observer: &NOOP,
        }
    }

    pub fn with_transcript(mut self, transcript: &'a Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn Observer) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &'a dyn Observer {
        self.observer
    }

    /// Dispatch with the prompt book's template for `stage`.
    pub async fn dispatch(&self, stage: Stage, vars: &[(&str, &str)]) -> Result<String> {
        let template = self.prompts.get(stage)?;
        self.send(stage, template, vars).await
    }

    pub async fn send(&self, stage: Stage, template: &StageTemplate, vars: &[(&str, &str)]) -> Result<String> {
        let req = ChatRequest {
            stage,
            model: self.model.clone(),
            temperature: self.temperature,
            system: render(&template.system, vars)?,
            human: render(&template.human, vars)?,
        };

        info!(
            %stage,
            provider = self.provider.name(),
            model = %req.model,
            system_len = req.system.len(),
            human_len = req.human.len(),
            "dispatching"
        );
        debug!(%stage, human = %req.human, "prompt");

        self.observer.stage_started(stage);
        let started = Instant::now();
        let result = self.provider.complete(&req).await;
        let elapsed = started.elapsed();
        self.observer.stage_finished(stage, elapsed);

        let response = result?;
        info!(%stage, elapsed_ms = elapsed.as_millis() as u64, response_len = response.len(), "completed");

        if let Some(t) = self.transcript {
            t.record(Exchange {
                stage,
                model: req.model,
                system: req.system,
                human: req.human,
                response: response.clone(),
                at: Utc::now(),
                elapsed_ms: elapsed.as_millis(),
            });
        }
        Ok(response)
    }
}
