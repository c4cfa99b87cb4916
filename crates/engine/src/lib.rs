#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `zmirror_engine` turns a destination dataset tree into a recursively
//! synchronized copy of a source tree: a baseline full send the first time,
//! only the incremental changes since the most recent common snapshot
//! thereafter. The source is read-only; the destination is append-only
//! unless the caller explicitly authorizes destructive reconciliation.
//!
//! # Design
//!
//! The engine is a sequential driver around the transport and inventory
//! crates:
//!
//! - [`plan`](planner::plan) walks the source tree honoring the dataset
//!   filter and yields work items, parents before children.
//! - [`replicate_dataset`](replicate::replicate_dataset) runs the
//!   per-dataset state machine (inspect, resolve conflicts, plan send
//!   steps, transfer, bookmark) and returns an explicit
//!   [`DatasetOutcome`](zmirror_core::DatasetOutcome).
//! - [`build_transfer`](pipeline::build_transfer) assembles the
//!   send→receive pipeline from the capability set of each endpoint,
//!   eliding network stages in local mode and silently downgrading missing
//!   auxiliaries.
//! - [`run`](run::run) orchestrates the whole tree, wrapping each dataset
//!   in the retry controller and interpreting failures through the
//!   error-scope controller, then executes the optional reconciliation
//!   passes.
//!
//! All mutable per-run state (the `--force-once` budget, the capability
//! cache) lives in [`RunContext`](context::RunContext), threaded by
//! reference; nothing is process-global.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod planner;
pub mod reconcile;
pub mod replicate;
pub mod retry;
pub mod run;
pub mod scope;

pub use config::{
    DryRun, EngineConfig, ErrorScope, MissingSnapshotsPolicy, ReplicationJob,
};
pub use context::RunContext;
pub use planner::{WorkItem, plan};
pub use retry::RetryPolicy;
pub use run::{RunReport, run};
