//! `zfs list` invocations and strict output parsing.

use tracing::trace;
use zmirror_core::{Dataset, EntryKind, Error, Result, SnapshotEntry};
use zmirror_transport::{Elevation, Endpoint, ProgramRole, RunOptions, Runner};

/// Enumerates the snapshots of `dataset`, oldest first.
///
/// # Errors
///
/// Propagates command failures; malformed output is [`Error::Protocol`].
pub fn snapshots(
    runner: &Runner,
    endpoint: &Endpoint,
    dataset: &Dataset,
) -> Result<Vec<SnapshotEntry>> {
    list_entries(runner, endpoint, dataset, EntryKind::Snapshot)
}

/// Enumerates the bookmarks of `dataset`, oldest first.
///
/// # Errors
///
/// Propagates command failures; malformed output is [`Error::Protocol`].
pub fn bookmarks(
    runner: &Runner,
    endpoint: &Endpoint,
    dataset: &Dataset,
) -> Result<Vec<SnapshotEntry>> {
    list_entries(runner, endpoint, dataset, EntryKind::Bookmark)
}

fn list_entries(
    runner: &Runner,
    endpoint: &Endpoint,
    dataset: &Dataset,
    kind: EntryKind,
) -> Result<Vec<SnapshotEntry>> {
    let zfs = endpoint.required_program(ProgramRole::Zfs)?;
    let type_name = match kind {
        EntryKind::Snapshot => "snapshot",
        EntryKind::Bookmark => "bookmark",
    };
    let argv = vec![
        zfs.to_owned(),
        "list".to_owned(),
        "-t".to_owned(),
        type_name.to_owned(),
        "-Hp".to_owned(),
        "-o".to_owned(),
        "name,guid,createtxg".to_owned(),
        "-s".to_owned(),
        "createtxg".to_owned(),
        "-d".to_owned(),
        "1".to_owned(),
        dataset.name().to_owned(),
    ];
    let output = runner.run(endpoint, &argv, Elevation::ReadOnly, RunOptions::metadata())?;
    let entries = parse_entries(&output.stdout, dataset, kind)?;
    trace!(
        dataset = %dataset,
        kind = type_name,
        count = entries.len(),
        "enumerated inventory"
    );
    Ok(entries)
}

/// Parses `zfs list -Hp -o name,guid,createtxg` output.
fn parse_entries(stdout: &str, dataset: &Dataset, kind: EntryKind) -> Result<Vec<SnapshotEntry>> {
    let context = match kind {
        EntryKind::Snapshot => "snapshot list",
        EntryKind::Bookmark => "bookmark list",
    };
    let separator = match kind {
        EntryKind::Snapshot => '@',
        EntryKind::Bookmark => '#',
    };
    let malformed = |line: &str| Error::Protocol {
        context: context.to_owned(),
        line: line.to_owned(),
    };

    let mut entries = Vec::new();
    for line in stdout.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(full_name), Some(guid), Some(createtxg), None) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(malformed(line));
        };
        let name = full_name
            .strip_prefix(dataset.name())
            .and_then(|rest| rest.strip_prefix(separator))
            .ok_or_else(|| malformed(line))?;
        if name.is_empty() {
            return Err(malformed(line));
        }
        let guid = guid.parse::<u64>().map_err(|_| malformed(line))?;
        let createtxg = createtxg.parse::<u64>().map_err(|_| malformed(line))?;
        entries.push(SnapshotEntry {
            dataset: dataset.clone(),
            name: name.to_owned(),
            guid,
            createtxg,
            kind,
        });
    }
    Ok(entries)
}

/// Merges snapshot and bookmark lists into one sequence ordered by
/// createtxg, snapshots before bookmarks within a transaction group.
#[must_use]
pub fn merge_entries(
    snapshots: Vec<SnapshotEntry>,
    bookmarks: Vec<SnapshotEntry>,
) -> Vec<SnapshotEntry> {
    let mut merged = snapshots;
    merged.extend(bookmarks);
    merged.sort_by_key(|entry| (entry.createtxg, entry.kind == EntryKind::Bookmark));
    merged
}

/// Whether `dataset` exists on `endpoint`.
///
/// # Errors
///
/// Propagates failures other than the dataset itself being absent.
pub fn dataset_exists(runner: &Runner, endpoint: &Endpoint, dataset: &Dataset) -> Result<bool> {
    let zfs = endpoint.required_program(ProgramRole::Zfs)?;
    let argv = vec![
        zfs.to_owned(),
        "list".to_owned(),
        "-H".to_owned(),
        "-o".to_owned(),
        "name".to_owned(),
        dataset.name().to_owned(),
    ];
    match runner.run(endpoint, &argv, Elevation::ReadOnly, RunOptions::metadata()) {
        Ok(_) => Ok(true),
        Err(Error::CommandFailed { stderr_tail, .. })
            if stderr_tail.contains("does not exist") =>
        {
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Enumerates `root` and every dataset below it, parents before children.
///
/// # Errors
///
/// Propagates command failures; a listed name outside `root` or that fails
/// dataset validation is [`Error::Protocol`].
pub fn descendant_datasets(
    runner: &Runner,
    endpoint: &Endpoint,
    root: &Dataset,
) -> Result<Vec<Dataset>> {
    let zfs = endpoint.required_program(ProgramRole::Zfs)?;
    let argv = vec![
        zfs.to_owned(),
        "list".to_owned(),
        "-t".to_owned(),
        "filesystem,volume".to_owned(),
        "-Hp".to_owned(),
        "-o".to_owned(),
        "name".to_owned(),
        "-s".to_owned(),
        "name".to_owned(),
        "-r".to_owned(),
        root.name().to_owned(),
    ];
    let output = runner.run(endpoint, &argv, Elevation::ReadOnly, RunOptions::metadata())?;

    let mut datasets = Vec::new();
    for line in output.stdout.lines() {
        if line.is_empty() {
            continue;
        }
        let dataset = Dataset::parse(line).map_err(|_| Error::Protocol {
            context: "dataset list".to_owned(),
            line: line.to_owned(),
        })?;
        if !dataset.is_self_or_descendant_of(root) {
            return Err(Error::Protocol {
                context: "dataset list".to_owned(),
                line: line.to_owned(),
            });
        }
        datasets.push(dataset);
    }
    Ok(datasets)
}

/// Fetches one property's value for `root` and every dataset below it.
///
/// Unset properties are reported with ZFS's literal `-`.
///
/// # Errors
///
/// Propagates command failures; malformed lines are [`Error::Protocol`].
pub fn dataset_properties(
    runner: &Runner,
    endpoint: &Endpoint,
    root: &Dataset,
    property: &str,
) -> Result<std::collections::HashMap<String, String>> {
    let zfs = endpoint.required_program(ProgramRole::Zfs)?;
    let argv = vec![
        zfs.to_owned(),
        "get".to_owned(),
        "-Hp".to_owned(),
        "-r".to_owned(),
        "-o".to_owned(),
        "name,value".to_owned(),
        property.to_owned(),
        root.name().to_owned(),
    ];
    let output = runner.run(endpoint, &argv, Elevation::ReadOnly, RunOptions::metadata())?;

    let mut values = std::collections::HashMap::new();
    for line in output.stdout.lines() {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once('\t') else {
            return Err(Error::Protocol {
                context: "property list".to_owned(),
                line: line.to_owned(),
            });
        };
        values.insert(name.to_owned(), value.to_owned());
    }
    Ok(values)
}
