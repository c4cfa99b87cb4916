//! Source-tree walking and work-item emission.

use std::collections::HashMap;

use tracing::debug;
use zmirror_core::{Dataset, Error, Result};
use zmirror_inventory::{dataset_properties, descendant_datasets};

use crate::config::{EngineConfig, ReplicationJob};
use crate::context::RunContext;

/// Property values that veto a dataset under `--exclude-dataset-property`.
fn property_excludes(value: &str) -> bool {
    matches!(value, "false" | "off")
}

/// One dataset pair to replicate. Parents are emitted before children.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkItem {
    /// Source dataset.
    pub source: Dataset,
    /// Destination dataset (root destination plus the source-relative path).
    pub destination: Dataset,
    /// Depth below the job root; the root itself is 0.
    pub depth: usize,
}

/// Plans the ordered work list for one job.
///
/// Without `--recursive` the list is at most the root pair itself. With it,
/// the source tree is enumerated and filtered; exclusion is sticky: once a
/// dataset is excluded, its descendants are never even inspected.
///
/// # Errors
///
/// Propagates inventory failures and malformed dataset names.
pub fn plan(ctx: &RunContext<'_>, job: &ReplicationJob) -> Result<Vec<WorkItem>> {
    let config = ctx.config;
    if !config.recursive {
        if !selected(config, &job.source, &job.source)? {
            return Ok(Vec::new());
        }
        return Ok(vec![WorkItem {
            source: job.source.clone(),
            destination: job.destination.clone(),
            depth: 0,
        }]);
    }

    let tree = descendant_datasets(ctx.runner, &job.source_endpoint, &job.source)?;
    let properties: HashMap<String, String> = match &config.exclude_dataset_property {
        Some(property) => {
            dataset_properties(ctx.runner, &job.source_endpoint, &job.source, property)?
        }
        None => HashMap::new(),
    };
    let mut items = Vec::with_capacity(tree.len());
    let mut excluded_roots: Vec<Dataset> = Vec::new();

    for dataset in tree {
        if excluded_roots
            .iter()
            .any(|root| dataset.is_self_or_descendant_of(root))
        {
            continue;
        }
        if !selected(config, &dataset, &job.source)? {
            debug!(dataset = %dataset, "excluded by dataset filter");
            excluded_roots.push(dataset);
            continue;
        }
        if properties
            .get(dataset.name())
            .is_some_and(|value| property_excludes(value))
        {
            debug!(dataset = %dataset, "excluded by dataset property");
            excluded_roots.push(dataset);
            continue;
        }
        let relative = dataset
            .relative_to(&job.source)
            .ok_or_else(|| Error::Protocol {
                context: "dataset list".to_owned(),
                line: dataset.name().to_owned(),
            })?;
        let depth = if relative.is_empty() {
            0
        } else {
            relative.matches('/').count() + 1
        };
        if config.skip_parent && depth == 0 {
            continue;
        }
        items.push(WorkItem {
            source: dataset.clone(),
            destination: job.destination.join(relative),
            depth,
        });
    }
    Ok(items)
}

fn selected(config: &EngineConfig, dataset: &Dataset, root: &Dataset) -> Result<bool> {
    let relative = dataset.relative_to(root).ok_or_else(|| Error::Protocol {
        context: "dataset list".to_owned(),
        line: dataset.name().to_owned(),
    })?;
    Ok(config.dataset_filter.selects(relative, dataset.name()))
}
