use clap::Parser;
use fs_err as fs;
use std::io::IsTerminal;
use std::path::Path;
use tracing::info;

use appgen::cli::{check_approval, Args};
use appgen::config::Config;
use appgen::dispatch::Dispatcher;
use appgen::log::{self, Transcript};
use appgen::pipeline::{Pipeline, RunOptions};
use appgen::plan::PlanRefiner;
use appgen::prompt::PromptBook;
use appgen::provider::make_provider;
use appgen::tasks::TaskRegistry;
use appgen::ux::{self, ConsoleObserver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    log::init(args.verbose);

    let mut cfg = Config::load(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;
    check_approval(cfg.auto_approve, std::io::stdin().is_terminal())?;
    let instruction = args.instruction()?;

    let provider = make_provider(&cfg)?;
    let prompts = PromptBook::default().with_overrides(&cfg.prompts)?;
    let registry = TaskRegistry::default();
    let refiner = PlanRefiner::new(&cfg.plan_call_pattern)?;
    let transcript = Transcript::default();
    let observer = ConsoleObserver::new(cfg.auto_approve);
    info!(run_id = %transcript.run_id, provider = provider.name(), model = %cfg.model, "starting run");

    let dispatcher = Dispatcher::new(&*provider, &prompts, cfg.model.clone(), cfg.temperature)
        .with_transcript(&transcript)
        .with_observer(&observer);
    let pipeline = Pipeline::new(dispatcher, &registry)
        .with_refiner(refiner)
        .with_concurrency(cfg.concurrency);

    let result = pipeline.run(&instruction, &RunOptions::from_config(&cfg)).await;

    // Saved before the result is checked so failed runs keep their exchanges.
    let root = Path::new(&cfg.root);
    let saved = if cfg.save_transcript { transcript.save_or_warn(root) } else { None };

    let output = result?;
    let mut code = output.code;
    if !code.ends_with('\n') {
        code.push('\n');
    }
    match &args.out {
        Some(path) => fs::write(path, &code)?,
        None => print!("{code}"),
    }
    ux::print_summary(args.out.as_deref(), code.len(), saved.as_deref());
    Ok(())
}
