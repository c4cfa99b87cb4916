//! Cooperative cancellation shared between the CLI signal handler and the
//! runner's wait loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use zmirror_core::{Error, Result};

/// Clonable cancellation flag.
///
/// The CLI registers the inner flag with its signal handlers; the runner
/// polls it between subprocess wait iterations and tears pipelines down
/// when it flips.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns [`Error::Cancelled`] once cancellation was requested.
    ///
    /// # Errors
    ///
    /// Fails iff the token is cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The shared flag, for registration with `signal_hook::flag`.
    #[must_use]
    pub fn shared_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}
