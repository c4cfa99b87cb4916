#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! Thin command-line frontend for the zmirror replication engine. [`run`]
//! parses arguments, filters the environment, initializes logging, wires
//! SIGINT/SIGTERM to the engine's cancellation token, executes the run and
//! maps the result onto the workspace exit codes.

mod command;
mod parse;

use std::ffi::OsString;

use tracing::error;
use zmirror_core::ExitCode;
use zmirror_logging::LogLayout;
use zmirror_transport::{CancellationToken, Runner};

/// Parses `args` (including the program name) and executes one run.
///
/// Never panics on user input; every failure maps onto an [`ExitCode`].
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match command::clap_command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(err) => {
            // --help and --version arrive here as "errors"; clap renders them.
            let code = if err.use_stderr() {
                ExitCode::Usage
            } else {
                ExitCode::Ok
            };
            let _ = err.print();
            return code;
        }
    };

    let invocation = match parse::parse(&matches) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("zmirror: {err}");
            return ExitCode::Usage;
        }
    };

    let layout = LogLayout::new(invocation.log_dir.clone());
    if let Err(err) = zmirror_logging::init(invocation.verbosity, &layout) {
        // A broken log directory degrades to terminal-only diagnostics.
        eprintln!("zmirror: cannot set up log files: {err}");
    }

    let cancel = CancellationToken::new();
    register_signal_handlers(&cancel);
    let runner = Runner::new(cancel);

    match zmirror_engine::run(&invocation.config, &runner) {
        Ok(report) => match report.first_failure() {
            None => ExitCode::Ok,
            Some(error) => {
                error!(
                    %error,
                    failed = report.failed(),
                    replicated = report.replicated(),
                    "run finished with failures"
                );
                ExitCode::from_error(error)
            }
        },
        Err(error) => {
            error!(%error, "run aborted");
            ExitCode::from_error(&error)
        }
    }
}

/// SIGINT and SIGTERM flip the cancellation flag; the runner then tears
/// down every live pipeline stage and the run exits as interrupted.
#[cfg(unix)]
fn register_signal_handlers(cancel: &CancellationToken) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, cancel.shared_flag()) {
            tracing::warn!(signal, %err, "cannot register signal handler");
        }
    }
}

#[cfg(not(unix))]
fn register_signal_handlers(_cancel: &CancellationToken) {}
