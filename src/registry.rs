//! Registry-fed driver: scans the local equipment registry for pending
//! records, submits them to the processing pipeline in chunks, and marks
//! them according to the observed run outcome.
//!
//! Records become `completed` only when the run itself completed; a
//! failed or cancelled run marks them `failed` so they neither re-enqueue
//! silently nor read as done.

use std::path::Path;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineApi;
use crate::runner::{self, PollOutcome, RunnerConfig};
use crate::store::Registry;
use crate::types::{ItemStatus, RunState};

/// Final accounting for one registry drive.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RegistryReport {
    pub batches: u32,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: bool,
}

pub(crate) async fn run<P: PipelineApi>(
    api: &P,
    config: &RunnerConfig,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<RegistryReport, String> {
    let mut report = RegistryReport::default();

    eprintln!(
        "starting registry batch processing (chunk size {})",
        config.chunk_size
    );
    let outcome = drive(api, config, path, cancel, &mut report).await;
    if report.cancelled {
        eprintln!("\ninterrupted, remaining records stay pending");
    }
    eprintln!(
        "\n{} completed, {} failed across {} batches",
        report.completed, report.failed, report.batches
    );
    outcome?;
    Ok(report)
}

async fn drive<P: PipelineApi>(
    api: &P,
    config: &RunnerConfig,
    path: &Path,
    cancel: &CancellationToken,
    report: &mut RegistryReport,
) -> Result<(), String> {
    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(());
        }

        // Reload each iteration: the file is the source of truth and the
        // previous batch rewrote it.
        let mut registry = Registry::load(path)?;
        let pending = registry.pending_items(config.chunk_size as usize);
        if pending.is_empty() {
            eprintln!("no pending items found in registry, work complete");
            return Ok(());
        }

        eprintln!("\n--- processing batch of {} items ---", pending.len());
        let targets: Vec<&str> = pending
            .iter()
            .filter_map(|i| i.get("type").and_then(Value::as_str))
            .collect();
        eprintln!("targets: {}", targets.join(", "));

        // The server may not accept batch-registry submissions at all;
        // rejection halts here with every record still pending.
        let run_id = api
            .submit_registry(&pending)
            .await
            .map_err(|e| format!("pipeline rejected batch submission: {e}"))?;
        eprintln!("submitted to pipeline, run {run_id}");

        let status = match runner::poll_until_terminal(api, &run_id, config, cancel).await? {
            PollOutcome::Terminal(status) => status,
            PollOutcome::Cancelled => {
                report.cancelled = true;
                return Ok(());
            }
        };
        eprintln!("batch finished with status: {}", status.state);

        let outcome = if status.state == RunState::Completed {
            ItemStatus::Completed
        } else {
            ItemStatus::Failed
        };
        for item_type in &targets {
            if !registry.update_item_status(item_type, outcome) {
                eprintln!("warning: `{item_type}` disappeared from registry, not marked");
            }
        }
        registry.save()?;
        eprintln!("registry updated");

        match outcome {
            ItemStatus::Completed => report.completed += targets.len() as u64,
            _ => report.failed += targets.len() as u64,
        }
        report.batches += 1;

        if runner::sleep_or_cancel(config.batch_delay, cancel).await {
            report.cancelled = true;
            return Ok(());
        }
    }
}
