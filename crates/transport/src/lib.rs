#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `zmirror_transport` makes local, push, pull and pull-push replication
//! uniform. An [`Endpoint`] describes how to reach one side (direct exec for
//! the local marker, SSH with connection multiplexing otherwise, optional
//! `sudo` elevation for state-changing ZFS commands); the [`Runner`]
//! executes single commands and multi-stage pipelines against endpoints,
//! with captured stderr, optional timeouts and deterministic teardown.
//!
//! # Design
//!
//! - Commands are argv vectors end to end. The only place a shell string is
//!   built is the remote side of an SSH boundary, where each token is
//!   shell-quoted ([`quote`]) and the result passed as a single `ssh`
//!   argument.
//! - Every spawned child gets its own process group so a timeout or
//!   cancellation can terminate the whole group (SIGTERM, short grace,
//!   SIGKILL).
//! - [`Pipeline`] spawns its stages left to right, wiring each stage's
//!   stdout to the next stage's stdin at the OS level. A guard kills
//!   still-live stages in LIFO order on every exit path.
//!
//! # Invariants
//!
//! - A pipeline succeeds iff its final stage exits zero; an upstream
//!   SIGPIPE death after a clean final stage is treated as benign.
//! - Endpoints are immutable; capability probes ([`probe_capabilities`])
//!   run once per endpoint per run and are cached by the caller.
//! - stderr of every stage is drained concurrently and re-emitted line by
//!   line through `tracing` tagged with the stage label, preserving each
//!   stage's own write order.

pub mod cancel;
pub mod endpoint;
pub mod pipeline;
pub mod process;
pub mod probe;
pub mod quote;

pub use cancel::CancellationToken;
pub use endpoint::{Elevation, Endpoint, Location, ProgramMap, ProgramRole, SshOptions, SudoPolicy};
pub use pipeline::{Pipeline, Stage};
pub use process::{CommandOutput, RunOptions, Runner};
pub use probe::{Capabilities, probe_auxiliary, probe_capabilities};
