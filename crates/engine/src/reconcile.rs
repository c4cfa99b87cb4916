//! Destination reconciliation: prune what the source no longer has.
//!
//! Both passes operate only on filter-selected datasets and are gated on
//! their own CLI flags; replication never deletes anything by itself.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};
use zmirror_core::{Dataset, Result};
use zmirror_inventory::{dataset_exists, dataset_properties, descendant_datasets, snapshots};
use zmirror_transport::{Elevation, ProgramRole, RunOptions};

use crate::config::ReplicationJob;
use crate::context::RunContext;
use crate::planner::WorkItem;
use crate::replicate::destroy_snapshots;

/// Destroys destination snapshots (within the snapshot filter) whose GUID
/// no longer exists on the source, one batched `zfs destroy` per dataset.
///
/// # Errors
///
/// Propagates inventory and destroy failures.
pub fn delete_missing_snapshots(
    ctx: &RunContext<'_>,
    job: &ReplicationJob,
    items: &[WorkItem],
) -> Result<()> {
    for item in items {
        if !dataset_exists(ctx.runner, &job.dest_endpoint, &item.destination)? {
            continue;
        }
        let source_guids: HashSet<u64> = snapshots(ctx.runner, &job.source_endpoint, &item.source)?
            .iter()
            .map(|entry| entry.guid)
            .collect();
        let dst_snapshots = snapshots(ctx.runner, &job.dest_endpoint, &item.destination)?;
        let doomed: Vec<&str> = dst_snapshots
            .iter()
            .filter(|snapshot| ctx.config.snapshot_filter.selects(&snapshot.name))
            .filter(|snapshot| !source_guids.contains(&snapshot.guid))
            .map(|snapshot| snapshot.name.as_str())
            .collect();
        if doomed.is_empty() {
            continue;
        }
        info!(
            destination = %item.destination,
            count = doomed.len(),
            "pruning destination snapshots missing from the source"
        );
        destroy_snapshots(ctx, &job.dest_endpoint, item, &doomed)?;
    }
    Ok(())
}

/// Destroys selected destination datasets whose source counterpart is gone,
/// plus selected destination datasets whose entire subtree holds no
/// snapshot. The job's destination root itself is never destroyed.
///
/// # Errors
///
/// Propagates inventory and destroy failures.
pub fn delete_missing_datasets(
    ctx: &RunContext<'_>,
    job: &ReplicationJob,
    items: &[WorkItem],
) -> Result<()> {
    if !dataset_exists(ctx.runner, &job.dest_endpoint, &job.destination)? {
        return Ok(());
    }
    let source_relatives: HashSet<&str> = items
        .iter()
        .filter_map(|item| item.source.relative_to(&job.source))
        .collect();

    let tree = descendant_datasets(ctx.runner, &job.dest_endpoint, &job.destination)?;
    let properties: HashMap<String, String> = match &ctx.config.exclude_dataset_property {
        Some(property) => {
            dataset_properties(ctx.runner, &job.dest_endpoint, &job.destination, property)?
        }
        None => HashMap::new(),
    };

    // Snapshot presence per dataset, then propagated up so a dataset knows
    // whether anything in its subtree still carries data.
    let mut subtree_has_snapshots: HashMap<String, bool> = HashMap::new();
    for dataset in tree.iter().rev() {
        let own = !snapshots(ctx.runner, &job.dest_endpoint, dataset)?.is_empty();
        let children = tree
            .iter()
            .filter(|other| {
                other.parent().as_ref() == Some(dataset)
            })
            .any(|child| subtree_has_snapshots.get(child.name()).copied().unwrap_or(false));
        subtree_has_snapshots.insert(dataset.name().to_owned(), own || children);
    }

    let mut doomed: Vec<&Dataset> = Vec::new();
    for dataset in &tree {
        let Some(relative) = dataset.relative_to(&job.destination) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }
        if !ctx.config.dataset_filter.selects(relative, dataset.name()) {
            continue;
        }
        if properties
            .get(dataset.name())
            .is_some_and(|value| matches!(value.as_str(), "false" | "off"))
        {
            continue;
        }
        let missing = !source_relatives.contains(relative);
        let orphan = !subtree_has_snapshots
            .get(dataset.name())
            .copied()
            .unwrap_or(false);
        if missing || orphan {
            debug!(
                destination = %dataset,
                missing,
                orphan,
                "destination dataset scheduled for destruction"
            );
            doomed.push(dataset);
        }
    }

    // Destroy only the topmost doomed datasets; `-r` takes the subtree.
    let doomed_names: HashSet<&str> = doomed.iter().map(|dataset| dataset.name()).collect();
    for dataset in &doomed {
        let parent_doomed = dataset
            .parent()
            .is_some_and(|parent| doomed_names.contains(parent.name()));
        if parent_doomed {
            continue;
        }
        destroy_dataset(ctx, job, dataset)?;
    }
    Ok(())
}

fn destroy_dataset(ctx: &RunContext<'_>, job: &ReplicationJob, dataset: &Dataset) -> Result<()> {
    let zfs = job.dest_endpoint.required_program(ProgramRole::Zfs)?;
    let mut argv = vec![zfs.to_owned(), "destroy".to_owned(), "-r".to_owned()];
    if ctx.config.force_unmount {
        argv.push("-f".to_owned());
    }
    argv.push(dataset.name().to_owned());
    info!(destination = %dataset, "destroying destination dataset");
    if ctx.is_dry_run() {
        ctx.note_suppressed("destroy dataset", &argv);
        return Ok(());
    }
    ctx.runner
        .run(
            &job.dest_endpoint,
            &argv,
            Elevation::StateChanging,
            RunOptions::unbounded(),
        )
        .map(|_| ())
}
