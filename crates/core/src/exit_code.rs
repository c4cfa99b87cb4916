//! Centralized process exit codes.
//!
//! Every binary in the workspace maps its terminal [`Error`] through
//! [`ExitCode::from_error`] so scripts can distinguish usage mistakes from
//! ZFS failures, network failures and interruption.

use crate::error::Error;

/// Exit codes reported by the `zmirror` binary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// Full success.
    Ok = 0,
    /// Invalid arguments or flag combination.
    Usage = 1,
    /// A ZFS (or auxiliary) command failed, or its output was malformed,
    /// or destination state conflicted with the plan.
    Zfs = 2,
    /// SSH could not reach an endpoint.
    Network = 3,
    /// The run was cancelled by a signal or deadline.
    Interrupted = 4,
}

impl ExitCode {
    /// Maps an engine error onto its exit code.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Usage(_) => Self::Usage,
            Error::Endpoint { .. } => Self::Network,
            Error::CommandFailed { .. } | Error::Protocol { .. } | Error::PolicyConflict { .. } => {
                Self::Zfs
            }
            Error::Cancelled => Self::Interrupted,
        }
    }

    /// The numeric value handed to the OS.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Short description used in the final log line.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "success",
            Self::Usage => "usage error",
            Self::Zfs => "zfs error",
            Self::Network => "network error",
            Self::Interrupted => "interrupted",
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.as_i32() as u8)
    }
}
