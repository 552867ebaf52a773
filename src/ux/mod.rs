use colored::Colorize;
use humansize::{format_size, DECIMAL};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use crate::pipeline::observer::Observer;
use crate::wire::{Stage, Task};

/// Terminal observer: one spinner per running stage, plan and task tables,
/// and an interactive plan approval unless `auto_approve` is set.
pub struct ConsoleObserver {
    auto_approve: bool,
    multi: MultiProgress,
    running: Mutex<HashMap<Stage, (ProgressBar, usize)>>,
}

impl ConsoleObserver {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            multi: MultiProgress::new(),
            running: Mutex::new(HashMap::new()),
        }
    }
}

fn spinner_style() -> Option<ProgressStyle> {
    ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}")
        .ok()
        .map(|s| s.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "))
}

impl Observer for ConsoleObserver {
    fn stage_started(&self, stage: Stage) {
        let mut running = self.running.lock();
        let entry = running.entry(stage).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            if let Some(style) = spinner_style() {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            (pb, 0)
        });
        entry.1 += 1;
        if entry.1 > 1 {
            entry.0.set_message(format!("{} ({} in flight)", stage, entry.1));
        } else {
            entry.0.set_message(stage.to_string());
        }
    }

    fn stage_finished(&self, stage: Stage, elapsed: Duration) {
        let mut running = self.running.lock();
        let Some(entry) = running.get_mut(&stage) else {
            return;
        };
        entry.1 = entry.1.saturating_sub(1);
        if entry.1 == 0 {
            if let Some((pb, _)) = running.remove(&stage) {
                pb.finish_with_message(format!("{} {} ({:.1}s)", "✓".green(), stage, elapsed.as_secs_f32()));
            }
        } else {
            entry.0.set_message(format!("{} ({} in flight)", stage, entry.1));
        }
    }

    fn plan_ready(&self, plan: &str) {
        show_plan(plan);
    }

    fn tasks_ready(&self, tasks: &[Task]) {
        show_tasks(tasks);
    }

    fn feedback(&self, stage: Stage, feedback: &str, valid: Option<bool>) {
        let label = match valid {
            Some(true) => "[VALID]".green().bold(),
            Some(false) => "[INVALID]".yellow().bold(),
            None => "[REVIEW]".cyan().bold(),
        };
        let _ = self.multi.println(format!("{} {}\n{}", label, stage.to_string().bold(), indent(feedback.trim(), 2)));
    }

    fn approve_plan(&self, _plan: &str) -> bool {
        self.auto_approve || confirm("Generate code for this plan?")
    }
}

pub fn show_plan(plan: &str) {
    eprintln!("\n=== PLAN ===");
    if plan.trim().is_empty() {
        eprintln!("(no steps)");
        return;
    }
    for line in plan.lines() {
        match line.split_once(". ") {
            Some((n, rest)) => eprintln!("{} {}", format!("{n}.").bold(), rest),
            None => eprintln!("{line}"),
        }
    }
    eprintln!();
}

pub fn show_tasks(tasks: &[Task]) {
    eprintln!("\n=== TASKS ===");
    for t in tasks {
        eprintln!(
            "{}. {}  {}  {} {} {}",
            t.step,
            format!("[{}]", t.task_type).cyan().bold(),
            t.task_name.bold(),
            format!("{}: {}", t.input_key, t.input_data_type).dimmed(),
            "->".dimmed(),
            format!("{}: {}", t.output_key, t.output_data_type).dimmed(),
        );
    }
    eprintln!();
}

pub fn confirm(prompt: &str) -> bool {
    eprint!("{} [y/N]: ", prompt);
    let _ = io::stderr().flush();
    let mut s = String::new();
    if io::stdin().read_line(&mut s).is_ok() {
        let ans = s.trim().to_lowercase();
        ans == "y" || ans == "yes"
    } else {
        false
    }
}

pub fn print_summary(out: Option<&Path>, bytes: usize, transcript: Option<&Path>) {
    eprintln!(
        "\n{}",
        "┏━━━━━━━━━━━━━━━━━━━━━━━━ Result ━━━━━━━━━━━━━━━━━━━━━━━━━┓".bold()
    );
    match out {
        Some(p) => eprintln!("  {}: {}  ({})", "Wrote".green().bold(), p.display(), format_size(bytes, DECIMAL)),
        None => eprintln!("  {}: stdout  ({})", "Wrote".green().bold(), format_size(bytes, DECIMAL)),
    }
    if let Some(dir) = transcript {
        eprintln!("  {}: {}", "Transcript".cyan().bold(), dir.display());
    }
    eprintln!("{}", "┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛".bold());
}

fn indent(s: &str, n: usize) -> String {
    let pad = " ".repeat(n);
    s.lines()
        .map(|l| format!("{}{}", pad, l))
        .collect::<Vec<_>>()
        .join("\n")
}
