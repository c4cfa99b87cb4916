#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `zmirror_logging` wires the `tracing` macros used across the workspace
//! to two sinks: the user's terminal (level-filtered by `-v`/`-q`) and a
//! per-run timestamped log file under the log directory, with `current.log`
//! and `current.pv` symlinks refreshed at startup.
//!
//! # Design
//!
//! The subscriber is plain `tracing_subscriber::fmt` layers over a
//! registry; no custom layer machinery. File layout lives in [`layout`] so
//! it can be tested without installing a global subscriber.

pub mod layout;
mod verbosity;

pub use layout::LogLayout;
pub use verbosity::Verbosity;

use std::fs::File;
use std::io;
use std::sync::Arc;

use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes the global subscriber: terminal output at the verbosity's
/// level, full debug output into the run's log file.
///
/// # Errors
///
/// Returns the I/O error when the log directory or file cannot be created.
/// A second initialization in the same process is reported as
/// [`io::ErrorKind::AlreadyExists`].
pub fn init(verbosity: Verbosity, layout: &LogLayout) -> io::Result<()> {
    let file: Arc<File> = Arc::new(layout.create()?);

    let terminal = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(verbosity.level_filter());
    let logfile = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(file)
        .with_filter(Verbosity::Debug.level_filter());

    tracing_subscriber::registry()
        .with(terminal)
        .with(logfile)
        .try_init()
        .map_err(|err| io::Error::new(io::ErrorKind::AlreadyExists, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_the_log_file_and_symlinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = LogLayout::new(dir.path().to_path_buf());
        init(Verbosity::Quiet, &layout).expect("first init succeeds");

        assert!(layout.log_file().exists());
        let current = dir.path().join("current.log");
        assert_eq!(
            std::fs::read_link(current).expect("symlink exists"),
            layout.log_file()
        );

        // The global subscriber is process-wide; a second init must report
        // that instead of panicking.
        let again = init(Verbosity::Quiet, &layout);
        assert!(again.is_err());
    }
}
