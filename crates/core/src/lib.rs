#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `zmirror_core` holds the vocabulary shared by every crate in the zmirror
//! workspace: dataset names, snapshot and bookmark inventory entries, the
//! common-base result used to classify a replication as initial or
//! incremental, the workspace error taxonomy, and the process exit codes.
//!
//! # Design
//!
//! The types in this crate are deliberately passive. They validate their own
//! invariants on construction and are immutable afterwards; all behavior that
//! touches ZFS, SSH or the filesystem lives in the higher crates
//! (`zmirror_transport`, `zmirror_inventory`, `zmirror_engine`). Keeping the
//! data model free of I/O makes the resolver and planner logic trivially
//! testable.
//!
//! # Invariants
//!
//! - A [`Dataset`] name is a non-empty `pool[/component...]` path with no
//!   empty components and no `@`/`#` separators.
//! - A [`SnapshotEntry`] carries the GUID and createtxg reported by ZFS;
//!   bookmark entries are interchangeable with snapshot entries for
//!   common-base detection because ZFS preserves both values into bookmarks.
//! - [`Error`] variants map one-to-one onto the failure kinds the engine
//!   distinguishes; retryability is a property of the variant (and, for
//!   subprocess failures, of the captured stderr).

pub mod dataset;
pub mod error;
pub mod exit_code;
pub mod outcome;
pub mod snapshot;

pub use dataset::Dataset;
pub use error::{Error, Result};
pub use exit_code::ExitCode;
pub use outcome::{DatasetOutcome, ReplicationStats, SkipReason};
pub use snapshot::{CommonBase, EntryKind, SnapshotEntry};
