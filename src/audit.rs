//! Offset-chunked driver for the server-side batch audit pipeline.
//!
//! Each iteration triggers one slice `[offset, offset + chunk)`, polls the
//! resulting run to a terminal state, and advances only when the run
//! completed. An empty slice is the loop's sole normal termination.

use tokio_util::sync::CancellationToken;

use crate::pipeline::PipelineApi;
use crate::runner::{self, PollOutcome, RunnerConfig};
use crate::types::RunState;

/// Final accounting for one audit drive.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub batches: u32,
    pub items: u64,
    pub final_offset: u64,
    pub cancelled: bool,
}

pub(crate) async fn run<P: PipelineApi>(
    api: &P,
    config: &RunnerConfig,
    start_offset: u64,
    cancel: &CancellationToken,
) -> Result<AuditReport, String> {
    let mut report = AuditReport {
        final_offset: start_offset,
        ..AuditReport::default()
    };

    eprintln!(
        "starting batch audit (chunk size {}, offset {start_offset})",
        config.chunk_size
    );
    let outcome = drive(api, config, start_offset, cancel, &mut report).await;
    if report.cancelled {
        eprintln!("\ninterrupted, resume with --offset {}", report.final_offset);
    }
    eprintln!(
        "\ntotal items processed: {} ({} batches)",
        report.items, report.batches
    );
    outcome?;
    Ok(report)
}

async fn drive<P: PipelineApi>(
    api: &P,
    config: &RunnerConfig,
    start_offset: u64,
    cancel: &CancellationToken,
    report: &mut AuditReport,
) -> Result<(), String> {
    let mut offset = start_offset;

    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(());
        }

        eprintln!("\n--- batch: offset {offset}, limit {} ---", config.chunk_size);

        let batch = api
            .trigger_audit(offset, config.chunk_size)
            .await
            .map_err(|e| format!("failed to trigger batch at offset {offset}: {e}"))?;

        if batch.count == 0 {
            eprintln!("no more items to process, work complete");
            return Ok(());
        }

        let run_id = batch
            .run_id
            .ok_or_else(|| format!("batch at offset {offset} returned no runId"))?;

        eprintln!("batch submitted, run {run_id}");
        if !batch.items.is_empty() {
            let preview: Vec<&str> = batch.items.iter().take(3).map(String::as_str).collect();
            eprintln!(
                "processing {} items: {}...",
                batch.items.len(),
                preview.join(", ")
            );
        }

        let status = match runner::poll_until_terminal(api, &run_id, config, cancel).await? {
            PollOutcome::Terminal(status) => status,
            PollOutcome::Cancelled => {
                report.cancelled = true;
                return Ok(());
            }
        };

        eprintln!("batch finished with status: {}", status.state);

        // Advance only past confirmed-complete slices; a failed or
        // cancelled run needs operator attention before re-driving.
        if status.state != RunState::Completed {
            return Err(format!(
                "run {run_id} ended {}, stopping at offset {offset}",
                status.state
            ));
        }

        offset += config.chunk_size;
        report.batches += 1;
        report.items += batch.items.len() as u64;
        report.final_offset = offset;

        eprintln!("cooling down for {}s...", config.batch_delay.as_secs());
        if runner::sleep_or_cancel(config.batch_delay, cancel).await {
            report.cancelled = true;
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineError;
    use crate::pipeline::fake::{FakePipeline, batch, empty_batch, status};

    fn config(chunk_size: u64) -> RunnerConfig {
        RunnerConfig {
            chunk_size,
            ..RunnerConfig::audit_defaults()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drives_slices_until_server_reports_empty() {
        let fake = FakePipeline::default();
        fake.push_audit(Ok(batch(10, "run-1", &["PUMP-1", "PUMP-2"])));
        fake.push_audit(Ok(batch(10, "run-2", &["VALVE-1"])));
        fake.push_audit(Ok(empty_batch()));
        fake.push_status(Ok(status(RunState::Running)));
        fake.push_status(Ok(status(RunState::Completed)));
        fake.push_status(Ok(status(RunState::Completed)));

        let cancel = CancellationToken::new();
        let report = run(&fake, &config(10), 0, &cancel)
            .await
            .expect("drive should complete");

        assert_eq!(
            *fake.audit_calls.lock().unwrap(),
            vec![(0, 10), (10, 10), (20, 10)]
        );
        assert_eq!(report.batches, 2);
        assert_eq!(report.items, 3);
        assert_eq!(report.final_offset, 20);
        assert!(!report.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_from_a_nonzero_offset() {
        let fake = FakePipeline::default();
        fake.push_audit(Ok(empty_batch()));

        let cancel = CancellationToken::new();
        let report = run(&fake, &config(25), 75, &cancel)
            .await
            .expect("drive should complete");

        assert_eq!(*fake.audit_calls.lock().unwrap(), vec![(75, 25)]);
        assert_eq!(report.final_offset, 75);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_failure_halts_with_nothing_processed() {
        let fake = FakePipeline::default();
        fake.push_audit(Err(PipelineError::Status {
            code: 500,
            body: "internal error".to_string(),
        }));

        let cancel = CancellationToken::new();
        let err = run(&fake, &config(10), 0, &cancel)
            .await
            .expect_err("submission failure is fatal");

        assert!(err.contains("offset 0"), "unexpected error: {err}");
        assert_eq!(fake.audit_calls.lock().unwrap().len(), 1);
        assert_eq!(fake.status_call_count(), 0, "no run to poll after a failed submit");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_stops_without_advancing() {
        let fake = FakePipeline::default();
        fake.push_audit(Ok(batch(10, "run-1", &["PUMP-1"])));
        fake.push_status(Ok(status(RunState::Failed)));

        let cancel = CancellationToken::new();
        let err = run(&fake, &config(10), 0, &cancel)
            .await
            .expect_err("failed run is fatal");

        assert!(err.contains("run run-1 ended failed"), "unexpected error: {err}");
        assert_eq!(fake.audit_calls.lock().unwrap().len(), 1, "must not fetch the next slice");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_run_id_on_nonempty_batch_is_an_error() {
        let fake = FakePipeline::default();
        fake.push_audit(Ok(crate::pipeline::AuditBatch {
            count: 3,
            run_id: None,
            items: vec!["X".to_string()],
        }));

        let cancel = CancellationToken::new();
        let err = run(&fake, &config(10), 0, &cancel)
            .await
            .expect_err("missing runId is fatal");
        assert!(err.contains("no runId"), "unexpected error: {err}");
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_token_exits_before_any_request() {
        let fake = FakePipeline::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = run(&fake, &config(10), 0, &cancel)
            .await
            .expect("cancellation is a clean exit");

        assert!(report.cancelled);
        assert!(fake.audit_calls.lock().unwrap().is_empty());
    }
}
