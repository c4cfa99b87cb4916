//! Workspace error taxonomy.
//!
//! Every failure the engine distinguishes maps onto one [`Error`] variant.
//! Retryability is decided here, in one place: endpoint-level failures are
//! always worth retrying, subprocess failures only when their stderr matches
//! the transient-pattern table, everything else never.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Stderr fragments that indicate a transient condition worth retrying.
///
/// Matched case-insensitively as substrings of the captured stderr tail.
/// The list is deliberately explicit rather than heuristic: extending it is
/// a conscious decision, not a side effect.
const TRANSIENT_STDERR_PATTERNS: &[&str] = &[
    "dataset is busy",
    "dataset does not exist",
    "failed to create mountpoint",
    "connection reset",
    "connection timed out",
    "connection refused",
    "broken pipe",
    "ssh_exchange_identification",
    "cannot receive new filesystem stream",
    "checksum mismatch or incomplete stream",
];

/// Maximum number of stderr bytes preserved in a [`Error::CommandFailed`].
pub const STDERR_TAIL_LIMIT: usize = 4096;

/// Failure kinds the engine distinguishes.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid flag combination or unparseable argument. Never retried.
    #[error("usage: {0}")]
    Usage(String),

    /// SSH-level failure reaching an endpoint. Retryable.
    #[error("endpoint {endpoint}: {message}")]
    Endpoint {
        /// Human-readable endpoint description (`user@host:port` or `local`).
        endpoint: String,
        /// What went wrong.
        message: String,
    },

    /// A subprocess exited non-zero or could not be spawned.
    #[error("command {argv:?} failed with {status}: {stderr_tail}")]
    CommandFailed {
        /// The argv that was executed.
        argv: Vec<String>,
        /// Exit status description (`exit code N` or `signal N`).
        status: String,
        /// Trailing portion of the captured stderr.
        stderr_tail: String,
    },

    /// `zfs list` (or similar) produced output we cannot parse. Not retryable.
    #[error("malformed {context} output: {line:?}")]
    Protocol {
        /// Which inventory operation produced the output.
        context: String,
        /// The offending line.
        line: String,
    },

    /// Destination state conflicts with the plan and `--force` is absent.
    #[error("dataset {dataset}: {message}")]
    PolicyConflict {
        /// Destination dataset in conflict.
        dataset: String,
        /// Description of the conflicting state.
        message: String,
    },

    /// External cancellation (signal or deadline).
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Convenience constructor for [`Error::CommandFailed`] that clips the
    /// stderr tail to [`STDERR_TAIL_LIMIT`].
    #[must_use]
    pub fn command_failed(argv: Vec<String>, status: String, stderr: &str) -> Self {
        let tail_start = stderr.len().saturating_sub(STDERR_TAIL_LIMIT);
        // Avoid splitting a UTF-8 sequence when clipping.
        let tail_start = (tail_start..stderr.len())
            .find(|idx| stderr.is_char_boundary(*idx))
            .unwrap_or(stderr.len());
        Self::CommandFailed {
            argv,
            status,
            stderr_tail: stderr[tail_start..].trim_end().to_owned(),
        }
    }

    /// Whether the retry controller may re-attempt the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Endpoint { .. } => true,
            Self::CommandFailed { stderr_tail, .. } => stderr_is_transient(stderr_tail),
            Self::Usage(_)
            | Self::Protocol { .. }
            | Self::PolicyConflict { .. }
            | Self::Cancelled => false,
        }
    }
}

/// Returns true when the stderr tail matches a known-transient pattern.
#[must_use]
pub fn stderr_is_transient(stderr: &str) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    TRANSIENT_STDERR_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}
