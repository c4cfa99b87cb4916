//! Most-recent-common-snapshot resolution.

use std::collections::HashMap;

use zmirror_core::{CommonBase, EntryKind, SnapshotEntry};

/// Finds the incremental base between a source and a destination.
///
/// Returns the source entity (snapshot or bookmark) with the largest
/// createtxg whose GUID also appears among the destination snapshots, or
/// `None` when the replication must start from scratch. A bookmark carries
/// its origin snapshot's GUID and createtxg, so both kinds are candidates;
/// when a snapshot and its bookmark both survive on the source, the
/// snapshot wins the tie because it can anchor an intermediate-inclusive
/// send.
#[must_use]
pub fn resolve_common_base(
    source: &[SnapshotEntry],
    destination: &[SnapshotEntry],
) -> Option<CommonBase> {
    let dest_by_guid: HashMap<u64, &SnapshotEntry> = destination
        .iter()
        .filter(|entry| entry.kind == EntryKind::Snapshot)
        .map(|entry| (entry.guid, entry))
        .collect();

    source
        .iter()
        .filter(|entry| dest_by_guid.contains_key(&entry.guid))
        .max_by_key(|entry| (entry.createtxg, entry.kind == EntryKind::Snapshot))
        .map(|base| CommonBase {
            source: base.clone(),
            dest_snapshot: dest_by_guid[&base.guid].name.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use zmirror_core::Dataset;

    fn entry(name: &str, guid: u64, createtxg: u64, kind: EntryKind) -> SnapshotEntry {
        SnapshotEntry {
            dataset: Dataset::parse("tank/a").expect("dataset"),
            name: name.to_owned(),
            guid,
            createtxg,
            kind,
        }
    }

    fn snap(name: &str, guid: u64, createtxg: u64) -> SnapshotEntry {
        entry(name, guid, createtxg, EntryKind::Snapshot)
    }

    fn book(name: &str, guid: u64, createtxg: u64) -> SnapshotEntry {
        entry(name, guid, createtxg, EntryKind::Bookmark)
    }

    #[test]
    fn no_shared_guid_means_no_base() {
        let src = [snap("s1", 1, 10), snap("s2", 2, 20)];
        let dst = [snap("x", 99, 5)];
        assert!(resolve_common_base(&src, &dst).is_none());
        assert!(resolve_common_base(&src, &[]).is_none());
    }

    #[test]
    fn latest_shared_entry_wins() {
        let src = [snap("s1", 1, 10), snap("s2", 2, 20), snap("s3", 3, 30)];
        let dst = [snap("s1", 1, 100), snap("s2", 2, 200)];
        let base = resolve_common_base(&src, &dst).expect("base exists");
        assert_eq!(base.guid(), 2);
        assert_eq!(base.source.name, "s2");
        assert_eq!(base.dest_snapshot, "s2");
    }

    #[test]
    fn bookmarks_count_as_source_candidates() {
        // The snapshot for guid 2 was pruned on the source; its bookmark
        // still anchors the incremental.
        let src = [snap("s1", 1, 10), book("s2", 2, 20), snap("s3", 3, 30)];
        let dst = [snap("s1", 1, 100), snap("s2", 2, 200)];
        let base = resolve_common_base(&src, &dst).expect("base exists");
        assert_eq!(base.guid(), 2);
        assert_eq!(base.source.kind, EntryKind::Bookmark);
    }

    #[test]
    fn snapshot_beats_its_own_bookmark() {
        let src = [book("s2", 2, 20), snap("s2", 2, 20)];
        let dst = [snap("s2", 2, 200)];
        let base = resolve_common_base(&src, &dst).expect("base exists");
        assert_eq!(base.source.kind, EntryKind::Snapshot);
    }

    #[test]
    fn destination_bookmarks_are_not_match_targets() {
        // Only destination *snapshots* prove the data arrived.
        let src = [snap("s1", 1, 10)];
        let dst = [book("s1", 1, 50)];
        assert!(resolve_common_base(&src, &dst).is_none());
    }

    proptest! {
        /// The chosen base always has the largest createtxg among entries
        /// whose GUID exists on both sides; absence of a match yields None.
        #[test]
        fn base_is_maximal_among_matches(
            src_txgs in proptest::collection::vec((0u64..50, 0u64..1000), 0..12),
            dst_guids in proptest::collection::vec(0u64..50, 0..12),
        ) {
            let src: Vec<SnapshotEntry> = src_txgs
                .iter()
                .enumerate()
                .map(|(idx, (guid, txg))| snap(&format!("s{idx}"), *guid, *txg))
                .collect();
            let dst: Vec<SnapshotEntry> = dst_guids
                .iter()
                .enumerate()
                .map(|(idx, guid)| snap(&format!("d{idx}"), *guid, idx as u64))
                .collect();

            let matches: Vec<&SnapshotEntry> = src
                .iter()
                .filter(|entry| dst.iter().any(|d| d.guid == entry.guid))
                .collect();

            match resolve_common_base(&src, &dst) {
                None => prop_assert!(matches.is_empty()),
                Some(base) => {
                    prop_assert!(matches.iter().all(|m| m.createtxg <= base.source.createtxg));
                    prop_assert!(dst.iter().any(|d| d.guid == base.guid()));
                }
            }
        }
    }
}
