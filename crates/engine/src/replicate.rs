//! The per-dataset replication state machine.
//!
//! One dataset pair moves through inspect → conflict resolution → send-step
//! planning → transfer → bookmark. The function returns an explicit
//! [`DatasetOutcome`]; "skip" is an outcome, not an error.

use tracing::{debug, info};
use zmirror_core::{
    CommonBase, DatasetOutcome, Error, EntryKind, ReplicationStats, Result, SkipReason,
    SnapshotEntry,
};
use zmirror_inventory::{
    bookmarks, dataset_exists, merge_entries, resolve_common_base, snapshots,
};
use zmirror_transport::{Elevation, Endpoint, ProgramRole, RunOptions};

use crate::config::{DryRun, MissingSnapshotsPolicy, ReplicationJob};
use crate::context::RunContext;
use crate::pipeline::{SendStep, TransferSpec, build_transfer};
use crate::planner::WorkItem;

/// Replicates one dataset pair.
///
/// # Errors
///
/// Returns the error that stopped the dataset; the caller decides scope
/// (retry, skip, abort). Policy refusals surface as
/// [`Error::PolicyConflict`].
pub fn replicate_dataset(
    ctx: &RunContext<'_>,
    job: &ReplicationJob,
    item: &WorkItem,
) -> Result<DatasetOutcome> {
    let config = ctx.config;
    let caps_src = ctx.capabilities(&job.source_endpoint, item.source.pool())?;
    let caps_dst = ctx.capabilities(&job.dest_endpoint, item.destination.pool())?;

    // INSPECT
    let src_snapshots = snapshots(ctx.runner, &job.source_endpoint, &item.source)?;
    let candidates: Vec<&SnapshotEntry> = src_snapshots
        .iter()
        .filter(|snapshot| config.snapshot_filter.selects(&snapshot.name))
        .collect();
    let dst_exists = dataset_exists(ctx.runner, &job.dest_endpoint, &item.destination)?;
    let dst_snapshots = if dst_exists {
        snapshots(ctx.runner, &job.dest_endpoint, &item.destination)?
    } else {
        Vec::new()
    };

    if candidates.is_empty() {
        return handle_missing_snapshots(ctx, job, item, dst_exists, &dst_snapshots);
    }

    // The common base is resolved against the full source inventory, not
    // the name-filtered candidates: a snapshot hidden from replication can
    // still anchor an incremental. Bookmarks are also needed for the
    // idempotence check of the bookmark step, so list them whenever the
    // pool supports them and either consumer wants them.
    let source_bookmarks = if caps_src.bookmarks && (config.use_bookmarks || config.create_bookmarks)
    {
        bookmarks(ctx.runner, &job.source_endpoint, &item.source)?
    } else {
        Vec::new()
    };
    let entries = if config.use_bookmarks {
        merge_entries(src_snapshots.clone(), source_bookmarks.clone())
    } else {
        src_snapshots.clone()
    };
    let base = resolve_common_base(&entries, &dst_snapshots);

    // CONFLICT?
    let conflicts = conflicting(&dst_snapshots, base.as_ref());
    if !conflicts.is_empty() {
        if !ctx.take_force() {
            return Err(policy_conflict(item, base.as_ref(), &conflicts));
        }
        resolve_conflicts(ctx, job, item, base.as_ref(), &conflicts)?;
    }
    // A full send into a dataset that already exists needs `-F` on the
    // receive; with every destination snapshot gone it destroys nothing.
    let recv_force = dst_exists && base.is_none();

    // PLAN
    let steps = plan_steps(config.no_stream, &candidates, base.as_ref());
    if steps.is_empty() {
        debug!(source = %item.source, destination = %item.destination, "already up to date");
        return Ok(DatasetOutcome::UpToDate);
    }

    if !dst_exists {
        ensure_destination_parent(ctx, job, item)?;
    }

    // TRANSFER
    let latest = candidates.last().copied().cloned();
    let spec = TransferSpec {
        source_endpoint: &job.source_endpoint,
        dest_endpoint: &job.dest_endpoint,
        local_endpoint: &config.local_endpoint,
        source: &item.source,
        destination: &item.destination,
        caps_source: caps_src,
        caps_dest: caps_dst,
        local_pv: ctx.local_pv(),
        recv_force,
    };
    let stats = ReplicationStats {
        steps: steps.len(),
        snapshots_replicated: replicated_count(config.no_stream, &candidates, base.as_ref()),
    };
    for step in &steps {
        let pipeline = build_transfer(config, &spec, step)?;
        if config.dry_run == Some(DryRun::Send) {
            info!(
                source = %item.source,
                destination = %item.destination,
                step = %step.describe(&item.source),
                "dry run: transfer suppressed"
            );
            continue;
        }
        info!(
            source = %item.source,
            destination = %item.destination,
            step = %step.describe(&item.source),
            "transferring"
        );
        ctx.runner.run_pipeline(pipeline)?;
    }

    // BOOKMARK
    if let Some(latest) = &latest {
        if config.create_bookmarks && caps_src.bookmarks {
            ensure_bookmark(ctx, &job.source_endpoint, latest, &source_bookmarks)?;
        }
    }

    Ok(DatasetOutcome::Replicated(stats))
}

/// Chooses the ordered send steps for one dataset.
///
/// An empty result means the destination is already up to date. A bookmark
/// base cannot anchor `-I`, so it costs one plain `-i` hop to the next
/// candidate snapshot before intermediates resume.
pub(crate) fn plan_steps(
    no_stream: bool,
    candidates: &[&SnapshotEntry],
    base: Option<&CommonBase>,
) -> Vec<SendStep> {
    let Some(&latest) = candidates.last() else {
        return Vec::new();
    };
    match base {
        None => {
            if no_stream || candidates.len() == 1 {
                let target = if no_stream {
                    latest
                } else {
                    candidates[0]
                };
                return vec![SendStep {
                    base: None,
                    target: target.name.clone(),
                    intermediates: false,
                }];
            }
            let oldest = candidates[0];
            vec![
                SendStep {
                    base: None,
                    target: oldest.name.clone(),
                    intermediates: false,
                },
                SendStep {
                    base: Some(oldest.clone()),
                    target: latest.name.clone(),
                    intermediates: true,
                },
            ]
        }
        Some(base) => {
            if base.source.createtxg >= latest.createtxg {
                return Vec::new();
            }
            if no_stream {
                return vec![SendStep {
                    base: Some(base.source.clone()),
                    target: latest.name.clone(),
                    intermediates: false,
                }];
            }
            if base.source.kind == EntryKind::Bookmark {
                let Some(next) = candidates
                    .iter()
                    .find(|candidate| candidate.createtxg > base.source.createtxg)
                else {
                    return Vec::new();
                };
                let mut steps = vec![SendStep {
                    base: Some(base.source.clone()),
                    target: next.name.clone(),
                    intermediates: false,
                }];
                if next.createtxg < latest.createtxg {
                    steps.push(SendStep {
                        base: Some((*next).clone()),
                        target: latest.name.clone(),
                        intermediates: true,
                    });
                }
                return steps;
            }
            vec![SendStep {
                base: Some(base.source.clone()),
                target: latest.name.clone(),
                intermediates: true,
            }]
        }
    }
}

/// Destination snapshots that block the planned send.
pub(crate) fn conflicting<'a>(
    dst_snapshots: &'a [SnapshotEntry],
    base: Option<&CommonBase>,
) -> Vec<&'a SnapshotEntry> {
    match base {
        None => dst_snapshots.iter().collect(),
        Some(base) => {
            let Some(position) = dst_snapshots
                .iter()
                .position(|snapshot| snapshot.name == base.dest_snapshot)
            else {
                return Vec::new();
            };
            dst_snapshots[position + 1..].iter().collect()
        }
    }
}

fn policy_conflict(
    item: &WorkItem,
    base: Option<&CommonBase>,
    conflicts: &[&SnapshotEntry],
) -> Error {
    let message = match (base, conflicts.last()) {
        (Some(_), Some(newest)) => format!(
            "{} destination snapshot(s) newer than the common base (newest: @{}); \
             re-run with --force to roll back",
            conflicts.len(),
            newest.name
        ),
        _ => "destination dataset exists without a common base; \
              re-run with --force to replace it"
            .to_owned(),
    };
    Error::PolicyConflict {
        dataset: item.destination.name().to_owned(),
        message,
    }
}

fn resolve_conflicts(
    ctx: &RunContext<'_>,
    job: &ReplicationJob,
    item: &WorkItem,
    base: Option<&CommonBase>,
    conflicts: &[&SnapshotEntry],
) -> Result<()> {
    match base {
        Some(base) => {
            let zfs = job.dest_endpoint.required_program(ProgramRole::Zfs)?;
            let mut argv = vec![zfs.to_owned(), "rollback".to_owned(), "-r".to_owned()];
            if ctx.config.force_unmount {
                argv.push("-f".to_owned());
            }
            argv.push(item.destination.snapshot_name(&base.dest_snapshot));
            info!(
                destination = %item.destination,
                base = %base.dest_snapshot,
                discarded = conflicts.len(),
                "rolling destination back to the common base"
            );
            mutate(ctx, &job.dest_endpoint, argv, "rollback")
        }
        None if conflicts.is_empty() => Ok(()),
        None => {
            let names: Vec<&str> = conflicts
                .iter()
                .map(|snapshot| snapshot.name.as_str())
                .collect();
            info!(
                destination = %item.destination,
                count = names.len(),
                "destroying destination snapshots without a source counterpart"
            );
            destroy_snapshots(ctx, &job.dest_endpoint, item, &names)
        }
    }
}

/// Destroys a batch of snapshots of one destination dataset with a single
/// `zfs destroy ds@a,b,c`.
pub(crate) fn destroy_snapshots(
    ctx: &RunContext<'_>,
    endpoint: &Endpoint,
    item: &WorkItem,
    names: &[&str],
) -> Result<()> {
    if names.is_empty() {
        return Ok(());
    }
    let zfs = endpoint.required_program(ProgramRole::Zfs)?;
    let argv = vec![
        zfs.to_owned(),
        "destroy".to_owned(),
        item.destination.snapshot_name(&names.join(",")),
    ];
    mutate(ctx, endpoint, argv, "destroy snapshots")
}

fn handle_missing_snapshots(
    ctx: &RunContext<'_>,
    job: &ReplicationJob,
    item: &WorkItem,
    dst_exists: bool,
    dst_snapshots: &[SnapshotEntry],
) -> Result<DatasetOutcome> {
    match ctx.config.skip_missing_snapshots {
        MissingSnapshotsPolicy::Fail => Err(Error::PolicyConflict {
            dataset: item.source.name().to_owned(),
            message: "source dataset has no matching snapshots \
                      (--skip-missing-snapshots=fail)"
                .to_owned(),
        }),
        MissingSnapshotsPolicy::Dataset => {
            debug!(source = %item.source, "no matching snapshots, skipping dataset");
            Ok(DatasetOutcome::Skipped(SkipReason::NoSourceSnapshots))
        }
        MissingSnapshotsPolicy::Continue => {
            if ctx.config.force && !dst_snapshots.is_empty() {
                let names: Vec<&str> = dst_snapshots
                    .iter()
                    .map(|snapshot| snapshot.name.as_str())
                    .collect();
                destroy_snapshots(ctx, &job.dest_endpoint, item, &names)?;
            }
            if !dst_exists {
                // Descendants still replicate; give them their parent.
                ensure_destination_parent(ctx, job, item)?;
                create_dataset(ctx, &job.dest_endpoint, &item.destination)?;
            }
            Ok(DatasetOutcome::Skipped(SkipReason::NoSourceSnapshots))
        }
    }
}

fn ensure_destination_parent(
    ctx: &RunContext<'_>,
    job: &ReplicationJob,
    item: &WorkItem,
) -> Result<()> {
    let Some(parent) = item.destination.parent() else {
        return Ok(());
    };
    if dataset_exists(ctx.runner, &job.dest_endpoint, &parent)? {
        return Ok(());
    }
    create_dataset(ctx, &job.dest_endpoint, &parent)
}

fn create_dataset(
    ctx: &RunContext<'_>,
    endpoint: &Endpoint,
    dataset: &zmirror_core::Dataset,
) -> Result<()> {
    let zfs = endpoint.required_program(ProgramRole::Zfs)?;
    let argv = vec![
        zfs.to_owned(),
        "create".to_owned(),
        "-p".to_owned(),
        "-u".to_owned(),
        dataset.name().to_owned(),
    ];
    mutate(ctx, endpoint, argv, "create dataset")
}

/// Creates the bookmark recording the snapshot just replicated, so future
/// incrementals survive source-side pruning. Idempotent: an existing
/// bookmark with the same GUID is a no-op.
fn ensure_bookmark(
    ctx: &RunContext<'_>,
    endpoint: &Endpoint,
    snapshot: &SnapshotEntry,
    existing: &[SnapshotEntry],
) -> Result<()> {
    if let Some(bookmark) = existing
        .iter()
        .find(|bookmark| bookmark.name == snapshot.name)
    {
        if bookmark.guid == snapshot.guid {
            return Ok(());
        }
        return Err(Error::PolicyConflict {
            dataset: snapshot.dataset.name().to_owned(),
            message: format!(
                "bookmark #{} already exists with a different origin",
                snapshot.name
            ),
        });
    }
    let zfs = endpoint.required_program(ProgramRole::Zfs)?;
    let argv = vec![
        zfs.to_owned(),
        "bookmark".to_owned(),
        snapshot.full_name(),
        snapshot.dataset.bookmark_name(&snapshot.name),
    ];
    mutate(ctx, endpoint, argv, "bookmark")
}

fn replicated_count(
    no_stream: bool,
    candidates: &[&SnapshotEntry],
    base: Option<&CommonBase>,
) -> usize {
    if no_stream {
        return usize::from(!candidates.is_empty());
    }
    match base {
        None => candidates.len(),
        Some(base) => candidates
            .iter()
            .filter(|candidate| candidate.createtxg > base.source.createtxg)
            .count(),
    }
}

/// Runs a state-changing command, or logs it when a dry run suppresses it.
fn mutate(
    ctx: &RunContext<'_>,
    endpoint: &Endpoint,
    argv: Vec<String>,
    action: &str,
) -> Result<()> {
    if ctx.is_dry_run() {
        ctx.note_suppressed(action, &argv);
        return Ok(());
    }
    ctx.runner
        .run(endpoint, &argv, Elevation::StateChanging, RunOptions::unbounded())
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zmirror_core::Dataset;

    fn snap(name: &str, guid: u64, createtxg: u64) -> SnapshotEntry {
        SnapshotEntry {
            dataset: Dataset::parse("tank/a").expect("dataset"),
            name: name.to_owned(),
            guid,
            createtxg,
            kind: EntryKind::Snapshot,
        }
    }

    fn book(name: &str, guid: u64, createtxg: u64) -> SnapshotEntry {
        SnapshotEntry {
            kind: EntryKind::Bookmark,
            ..snap(name, guid, createtxg)
        }
    }

    fn base_of(entry: &SnapshotEntry) -> CommonBase {
        CommonBase {
            source: entry.clone(),
            dest_snapshot: entry.name.clone(),
        }
    }

    #[test]
    fn initial_replication_sends_oldest_then_intermediates() {
        let s1 = snap("s1", 1, 10);
        let s2 = snap("s2", 2, 20);
        let s3 = snap("s3", 3, 30);
        let candidates = vec![&s1, &s2, &s3];

        let steps = plan_steps(false, &candidates, None);
        assert_eq!(steps.len(), 2);
        assert!(steps[0].base.is_none());
        assert_eq!(steps[0].target, "s1");
        assert_eq!(steps[1].base.as_ref().expect("base").name, "s1");
        assert_eq!(steps[1].target, "s3");
        assert!(steps[1].intermediates);
    }

    #[test]
    fn initial_no_stream_sends_only_the_latest() {
        let s1 = snap("s1", 1, 10);
        let s2 = snap("s2", 2, 20);
        let candidates = vec![&s1, &s2];

        let steps = plan_steps(true, &candidates, None);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].base.is_none());
        assert_eq!(steps[0].target, "s2");
    }

    #[test]
    fn incremental_uses_intermediates_by_default() {
        let s2 = snap("s2", 2, 20);
        let s3 = snap("s3", 3, 30);
        let s4 = snap("s4", 4, 40);
        let candidates = vec![&s2, &s3, &s4];

        let steps = plan_steps(false, &candidates, Some(&base_of(&s2)));
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].base.as_ref().expect("base").name, "s2");
        assert_eq!(steps[0].target, "s4");
        assert!(steps[0].intermediates);
    }

    #[test]
    fn no_stream_incremental_is_a_single_hop() {
        let s2 = snap("s2", 2, 20);
        let s4 = snap("s4", 4, 40);
        let candidates = vec![&s2, &s4];

        let steps = plan_steps(true, &candidates, Some(&base_of(&s2)));
        assert_eq!(steps.len(), 1);
        assert!(!steps[0].intermediates);
        assert_eq!(steps[0].target, "s4");
    }

    #[test]
    fn bookmark_base_costs_one_plain_hop() {
        let b2 = book("s2", 2, 20);
        let s3 = snap("s3", 3, 30);
        let s4 = snap("s4", 4, 40);
        let candidates = vec![&s3, &s4];

        let steps = plan_steps(false, &candidates, Some(&base_of(&b2)));
        assert_eq!(steps.len(), 2);
        assert!(!steps[0].intermediates, "-I cannot start from a bookmark");
        assert_eq!(steps[0].base.as_ref().expect("base").kind, EntryKind::Bookmark);
        assert_eq!(steps[0].target, "s3");
        assert!(steps[1].intermediates);
        assert_eq!(steps[1].base.as_ref().expect("base").name, "s3");
        assert_eq!(steps[1].target, "s4");
    }

    #[test]
    fn up_to_date_plans_nothing() {
        let s3 = snap("s3", 3, 30);
        let candidates = vec![&s3];
        assert!(plan_steps(false, &candidates, Some(&base_of(&s3))).is_empty());
        assert!(plan_steps(false, &[], None).is_empty());
    }

    #[test]
    fn conflicting_snapshots_are_those_newer_than_the_base() {
        let dst = vec![snap("s1", 1, 10), snap("s2", 2, 20), snap("x", 99, 30)];
        let base = base_of(&dst[1]);

        let conflicts = conflicting(&dst, Some(&base));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].name, "x");

        let all = conflicting(&dst, None);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn replicated_count_tracks_candidates_past_the_base() {
        let s1 = snap("s1", 1, 10);
        let s2 = snap("s2", 2, 20);
        let s3 = snap("s3", 3, 30);
        let candidates = vec![&s1, &s2, &s3];

        assert_eq!(replicated_count(false, &candidates, None), 3);
        assert_eq!(
            replicated_count(false, &candidates, Some(&base_of(&s1))),
            2
        );
        assert_eq!(replicated_count(true, &candidates, None), 1);
    }
}
