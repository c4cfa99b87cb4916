//! Snapshot and bookmark inventory entries.

use crate::dataset::Dataset;

/// Whether an inventory entry is a snapshot or a bookmark.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EntryKind {
    /// A full snapshot, usable as the base or target of any send.
    Snapshot,
    /// A bookmark. Holds the origin snapshot's GUID and createtxg but can
    /// only serve as the origin of a plain (`-i`) incremental send.
    Bookmark,
}

/// One snapshot or bookmark of a dataset, as reported by `zfs list`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotEntry {
    /// Dataset the entry belongs to.
    pub dataset: Dataset,
    /// Short name, i.e. the part after `@` or `#`.
    pub name: String,
    /// 64-bit GUID identifying the data origin across send/receive.
    pub guid: u64,
    /// Transaction group in which the origin snapshot was created.
    pub createtxg: u64,
    /// Snapshot or bookmark.
    pub kind: EntryKind,
}

impl SnapshotEntry {
    /// Full `dataset@name` or `dataset#name` spelling accepted by `zfs`.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.kind {
            EntryKind::Snapshot => self.dataset.snapshot_name(&self.name),
            EntryKind::Bookmark => self.dataset.bookmark_name(&self.name),
        }
    }

    /// Spelling used as the origin operand of `zfs send -i`.
    ///
    /// ZFS accepts the short `@name`/`#name` form for the origin; the short
    /// form keeps the remote command line independent of the source mount.
    #[must_use]
    pub fn origin_operand(&self) -> String {
        match self.kind {
            EntryKind::Snapshot => format!("@{}", self.name),
            EntryKind::Bookmark => format!("#{}", self.name),
        }
    }
}

/// The most recent entity shared by source and destination.
///
/// `source` is the source-side snapshot or bookmark with the largest
/// createtxg whose GUID also exists as a destination snapshot. It is the
/// origin of the next incremental send.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommonBase {
    /// Source-side snapshot or bookmark serving as the incremental origin.
    pub source: SnapshotEntry,
    /// Short name of the matching destination snapshot.
    pub dest_snapshot: String,
}

impl CommonBase {
    /// GUID shared by both sides.
    #[must_use]
    pub fn guid(&self) -> u64 {
        self.source.guid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: EntryKind) -> SnapshotEntry {
        SnapshotEntry {
            dataset: Dataset::parse("tank/a").expect("dataset"),
            name: "daily1".into(),
            guid: 7,
            createtxg: 42,
            kind,
        }
    }

    #[test]
    fn full_name_uses_kind_separator() {
        assert_eq!(entry(EntryKind::Snapshot).full_name(), "tank/a@daily1");
        assert_eq!(entry(EntryKind::Bookmark).full_name(), "tank/a#daily1");
    }

    #[test]
    fn origin_operand_is_short_form() {
        assert_eq!(entry(EntryKind::Snapshot).origin_operand(), "@daily1");
        assert_eq!(entry(EntryKind::Bookmark).origin_operand(), "#daily1");
    }
}
