//! Top-level orchestration: plan, replicate, contain failures, reconcile.

use tracing::{error, info};
use zmirror_core::{DatasetOutcome, Error, Result, SkipReason};
use zmirror_transport::Runner;

use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::planner::{WorkItem, plan};
use crate::reconcile::{delete_missing_datasets, delete_missing_snapshots};
use crate::replicate::replicate_dataset;
use crate::retry::with_retries;
use crate::scope::{ScopeDecision, SkippedTrees, on_failure};

/// One dataset's final disposition within the run.
#[derive(Debug)]
pub struct DatasetReport {
    /// The dataset pair.
    pub item: WorkItem,
    /// What happened to it.
    pub outcome: DatasetOutcome,
}

/// Aggregated result of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Per-dataset outcomes in processing order.
    pub datasets: Vec<DatasetReport>,
}

impl RunReport {
    fn push(&mut self, item: WorkItem, outcome: DatasetOutcome) {
        self.datasets.push(DatasetReport { item, outcome });
    }

    /// Number of datasets that transferred at least one snapshot.
    #[must_use]
    pub fn replicated(&self) -> usize {
        self.datasets
            .iter()
            .filter(|report| matches!(report.outcome, DatasetOutcome::Replicated(_)))
            .count()
    }

    /// Number of datasets skipped under a policy.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.datasets
            .iter()
            .filter(|report| matches!(report.outcome, DatasetOutcome::Skipped(_)))
            .count()
    }

    /// Number of datasets that failed after retries.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.datasets
            .iter()
            .filter(|report| matches!(report.outcome, DatasetOutcome::Failed(_)))
            .count()
    }

    /// The first failure, if any; decides the process exit code.
    #[must_use]
    pub fn first_failure(&self) -> Option<&Error> {
        self.datasets.iter().find_map(|report| match &report.outcome {
            DatasetOutcome::Failed(error) => Some(error),
            _ => None,
        })
    }

    /// True when every dataset either replicated or was legitimately
    /// skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Executes one full run over every configured job.
///
/// # Errors
///
/// Returns early on cancellation, on planner failures, and on failures the
/// `--skip-on-error` policy escalates to a run abort. Contained per-dataset
/// failures are reported in the [`RunReport`] instead.
pub fn run(config: &EngineConfig, runner: &Runner) -> Result<RunReport> {
    let ctx = RunContext::new(config, runner);
    let mut report = RunReport::default();

    for job in &config.jobs {
        runner.cancellation().check()?;
        let items = plan(&ctx, job)?;
        info!(
            source = %job.source,
            destination = %job.destination,
            datasets = items.len(),
            "planned replication"
        );

        let mut skipped = SkippedTrees::new();
        let mut clean: Vec<WorkItem> = Vec::new();

        for item in items {
            if skipped.covers(&item.source) {
                report.push(item, DatasetOutcome::Skipped(SkipReason::AncestorFailed));
                continue;
            }
            if config.skip_replication {
                clean.push(item.clone());
                report.push(item, DatasetOutcome::UpToDate);
                continue;
            }

            let outcome = with_retries(
                &config.retry,
                runner.cancellation(),
                item.source.name(),
                || replicate_dataset(&ctx, job, &item),
            );
            match outcome {
                Ok(outcome) => {
                    if outcome.is_success() {
                        clean.push(item.clone());
                    }
                    report.push(item, outcome);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    error!(
                        source = %item.source,
                        destination = %item.destination,
                        %err,
                        "dataset failed"
                    );
                    match on_failure(&ctx, &item, &err) {
                        ScopeDecision::Abort => return Err(err),
                        ScopeDecision::SkipTree => {
                            skipped.mark(item.source.clone());
                            report.push(item, DatasetOutcome::Failed(err));
                        }
                        ScopeDecision::SkipDataset => {
                            report.push(item, DatasetOutcome::Failed(err));
                        }
                    }
                }
            }
        }

        if config.delete_missing_snapshots {
            delete_missing_snapshots(&ctx, job, &clean)?;
        }
        if config.delete_missing_datasets {
            delete_missing_datasets(&ctx, job, &clean)?;
        }
    }

    info!(
        replicated = report.replicated(),
        skipped = report.skipped(),
        failed = report.failed(),
        "run complete"
    );
    Ok(report)
}
