#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `zmirror_inventory` answers "what exists" questions against live ZFS:
//! which datasets sit below a root, which snapshots and bookmarks a dataset
//! has (with GUIDs and createtxgs, in creation order), and which shared
//! entity is the most recent common base between a source and a destination.
//!
//! # Design
//!
//! All knowledge is reconstructed at run time from `zfs list` output; there
//! is no catalog between runs. Enumeration drives
//! `zfs list -t ... -Hp -o name,guid,createtxg -s createtxg` and parses the
//! tab-separated output strictly: a malformed line is a protocol error, not
//! a guess.
//!
//! The resolver ([`resolve_common_base`]) is pure and lives apart from the
//! I/O so its invariants can be property-tested.

mod list;
mod resolve;

pub use list::{
    bookmarks, dataset_exists, dataset_properties, descendant_datasets, merge_entries, snapshots,
};
pub use resolve::resolve_common_base;
