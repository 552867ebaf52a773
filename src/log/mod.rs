use chrono::{DateTime, Utc};
use fs_err as fs;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::errors::Result;
use crate::wire::Stage;

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `-v`.
pub fn init(verbosity: u8) {
    let fallback = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("appgen={fallback}")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// One dispatched request and the raw completion it got back.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub stage: Stage,
    pub model: String,
    pub system: String,
    pub human: String,
    pub response: String,
    pub at: DateTime<Utc>,
    pub elapsed_ms: u128,
}

/// Every exchange of one run, in the order they completed.
pub struct Transcript {
    pub run_id: Uuid,
    exchanges: Mutex<Vec<Exchange>>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl Transcript {
    pub fn new(run_id: Uuid) -> Self {
        Self { run_id, exchanges: Mutex::new(Vec::new()) }
    }

    pub fn record(&self, exchange: Exchange) {
        self.exchanges.lock().push(exchange);
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.lock().clone()
    }

    pub fn run_dir(&self, root: &Path) -> PathBuf {
        root.join(".appgen").join("runs").join(self.run_id.to_string())
    }

    /// Write `NN-<stage>.json` per exchange under the run directory.
    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        let dir = self.run_dir(root);
        fs::create_dir_all(&dir)?;
        for (i, ex) in self.exchanges.lock().iter().enumerate() {
            let p = dir.join(format!("{:02}-{}.json", i + 1, ex.stage));
            let body = to_string_pretty(ex)?;
            fs::write(&p, body)?;
        }
        Ok(dir)
    }

    /// `save`, but a failure is only logged so it never hides the run's own result.
    pub fn save_or_warn(&self, root: &Path) -> Option<PathBuf> {
        match self.save(root) {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "could not save transcript");
                None
            }
        }
    }
}
