//! Failure containment across the dataset tree.

use tracing::warn;
use zmirror_core::{Dataset, Error};
use zmirror_inventory::dataset_exists;

use crate::config::ErrorScope;
use crate::context::RunContext;
use crate::planner::WorkItem;

/// What the run loop should do after a dataset failed.
#[derive(Debug, Eq, PartialEq)]
pub enum ScopeDecision {
    /// Abort the whole run with this failure.
    Abort,
    /// Record the failure, skip the dataset's entire subtree.
    SkipTree,
    /// Record the failure, continue into the dataset's descendants.
    SkipDataset,
}

/// Applies the `--skip-on-error` policy to a failure at `item`.
///
/// `dataset` mode only contains the failure to the single dataset when its
/// destination already exists (descendants may still be replicable);
/// otherwise nothing below can receive and it degrades to `tree`.
pub fn on_failure(ctx: &RunContext<'_>, item: &WorkItem, error: &Error) -> ScopeDecision {
    match ctx.config.skip_on_error {
        ErrorScope::Fail => ScopeDecision::Abort,
        ErrorScope::Tree => ScopeDecision::SkipTree,
        ErrorScope::Dataset => {
            let endpoint = ctx
                .config
                .jobs
                .iter()
                .find(|job| item.source.is_self_or_descendant_of(&job.source))
                .map(|job| job.dest_endpoint.clone());
            let exists = endpoint.and_then(|endpoint| {
                dataset_exists(ctx.runner, &endpoint, &item.destination).ok()
            });
            match exists {
                Some(true) => ScopeDecision::SkipDataset,
                _ => {
                    warn!(
                        dataset = %item.destination,
                        %error,
                        "destination missing after failure, skipping subtree"
                    );
                    ScopeDecision::SkipTree
                }
            }
        }
    }
}

/// Tracks skipped subtree roots so descendants are never inspected.
#[derive(Debug, Default)]
pub struct SkippedTrees {
    roots: Vec<Dataset>,
}

impl SkippedTrees {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `root` and everything below it as skipped.
    pub fn mark(&mut self, root: Dataset) {
        self.roots.push(root);
    }

    /// True when `dataset` falls under a skipped root.
    #[must_use]
    pub fn covers(&self, dataset: &Dataset) -> bool {
        self.roots
            .iter()
            .any(|root| dataset.is_self_or_descendant_of(root))
    }
}
