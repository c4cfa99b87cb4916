//! Immutable per-run engine configuration.

use std::sync::Arc;

use zmirror_core::Dataset;
use zmirror_filters::{DatasetFilter, NameFilter};
use zmirror_transport::Endpoint;

use crate::retry::RetryPolicy;

/// Policy when the filtered source candidate set of a dataset is empty.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MissingSnapshotsPolicy {
    /// Abort the whole run.
    #[default]
    Fail,
    /// Skip this dataset, leaving its destination untouched.
    Dataset,
    /// Carry on: create the destination dataset empty so descendants can
    /// replicate, and with `--force` destroy its stale destination
    /// snapshots.
    Continue,
}

/// Blast-radius policy for non-retryable (or exhausted) failures.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorScope {
    /// Abort the run on the first failure.
    Fail,
    /// Skip the failed dataset and its whole subtree.
    Tree,
    /// Skip only the failed dataset and continue into descendants when its
    /// destination already exists; degrade to [`ErrorScope::Tree`]
    /// otherwise.
    #[default]
    Dataset,
}

/// Dry-run flavors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DryRun {
    /// Plan everything, run nothing; send and receive are no-ops.
    Send,
    /// Run the real send but discard on the receive side (`zfs receive -n`).
    Recv,
}

/// One `SRC_DATASET DST_DATASET` pair with its endpoints.
#[derive(Clone, Debug)]
pub struct ReplicationJob {
    /// Endpoint the source dataset lives on.
    pub source_endpoint: Arc<Endpoint>,
    /// Root source dataset.
    pub source: Dataset,
    /// Endpoint the destination dataset lives on.
    pub dest_endpoint: Arc<Endpoint>,
    /// Root destination dataset.
    pub destination: Dataset,
}

/// Everything the engine needs for one run. Immutable once built.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Dataset pairs, processed in order.
    pub jobs: Vec<ReplicationJob>,
    /// Endpoint describing the initiator itself; contributes the optional
    /// `pv` stage between the SSH legs.
    pub local_endpoint: Arc<Endpoint>,
    /// Walk the source tree instead of the single root dataset.
    pub recursive: bool,
    /// With `--recursive`, replicate only the descendants of the root.
    pub skip_parent: bool,
    /// Authorize rollback/destroy of conflicting destination snapshots.
    pub force: bool,
    /// Like `force`, but the authorization may be spent at most once.
    pub force_once: bool,
    /// Add `-f` to rollback so busy mounts are unmounted first.
    pub force_unmount: bool,
    /// Send a single `-i` step instead of `-I` with intermediates.
    pub no_stream: bool,
    /// Consider source bookmarks when resolving the common base.
    pub use_bookmarks: bool,
    /// Create a source bookmark after each successful replication.
    pub create_bookmarks: bool,
    /// Policy when a source dataset has no matching snapshots.
    pub skip_missing_snapshots: MissingSnapshotsPolicy,
    /// Failure containment policy.
    pub skip_on_error: ErrorScope,
    /// Skip the replication phase; reconciliation still runs.
    pub skip_replication: bool,
    /// Prune destination snapshots absent from the source.
    pub delete_missing_snapshots: bool,
    /// Destroy destination datasets absent from the source.
    pub delete_missing_datasets: bool,
    /// Dry-run mode, if any.
    pub dry_run: Option<DryRun>,
    /// Dataset include/exclude policy.
    pub dataset_filter: DatasetFilter,
    /// Name of a ZFS user property that can veto a dataset: a value of
    /// `false` or `off` excludes the dataset and its subtree.
    pub exclude_dataset_property: Option<String>,
    /// Snapshot-name include/exclude policy.
    pub snapshot_filter: NameFilter,
    /// Retry budget for transient failures.
    pub retry: RetryPolicy,
    /// Extra options appended to `zfs send`.
    pub send_opts: Vec<String>,
    /// Extra options appended to `zfs receive`.
    pub recv_opts: Vec<String>,
    /// Rate limit handed to `pv --rate-limit`; also enables the pv stage.
    pub bwlimit: Option<String>,
}

impl EngineConfig {
    /// A conservative default configuration for the given jobs: append-only,
    /// non-recursive, no reconciliation, bookmarks on.
    #[must_use]
    pub fn new(jobs: Vec<ReplicationJob>) -> Self {
        Self {
            jobs,
            local_endpoint: Arc::new(Endpoint::local()),
            recursive: false,
            skip_parent: false,
            force: false,
            force_once: false,
            force_unmount: false,
            no_stream: false,
            use_bookmarks: true,
            create_bookmarks: true,
            skip_missing_snapshots: MissingSnapshotsPolicy::default(),
            skip_on_error: ErrorScope::default(),
            skip_replication: false,
            delete_missing_snapshots: false,
            delete_missing_datasets: false,
            dry_run: None,
            dataset_filter: DatasetFilter::default(),
            exclude_dataset_property: None,
            snapshot_filter: NameFilter::select_all(),
            retry: RetryPolicy::default(),
            send_opts: Vec::new(),
            recv_opts: Vec::new(),
            bwlimit: None,
        }
    }

    /// Whether destructive conflict resolution is authorized at all.
    #[must_use]
    pub fn force_available(&self) -> bool {
        self.force || self.force_once
    }
}
