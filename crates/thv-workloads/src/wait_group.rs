//! Aggregated completion handles for fan-out operations.

use thv_core::{Result, ThvError};
use tokio::task::JoinSet;

/// Wait handle returned by fan-out operations (stop, delete).
///
/// Workers never fail fast; `wait` blocks until every worker finished and
/// reports the failing names together as one `PartialFailure`.
pub struct WaitGroup {
    tasks: JoinSet<(String, Result<()>)>,
}

impl WaitGroup {
    pub(crate) fn new(tasks: JoinSet<(String, Result<()>)>) -> Self {
        Self { tasks }
    }

    /// Block until all workers complete; aggregate per-name errors.
    pub async fn wait(mut self) -> Result<()> {
        let mut failures = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => failures.push((name, e.to_string())),
                Err(e) => failures.push(("<worker>".to_string(), e.to_string())),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ThvError::PartialFailure { failures })
        }
    }
}

/// Fan-out worker bound: `min(N_CPU, 16)`.
pub(crate) fn worker_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(16)
}
