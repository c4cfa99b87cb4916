//! Per-run mutable state, threaded by reference through the replicator.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tracing::info;
use zmirror_core::Result;
use zmirror_transport::{
    Capabilities, Endpoint, ProgramRole, Runner, probe_auxiliary, probe_capabilities,
};

use crate::config::EngineConfig;

/// The single per-run context value.
///
/// Holds the capability cache and the `--force-once` budget so neither
/// needs process-global state. The engine is sequential, so plain `Cell`
/// and `RefCell` suffice.
pub struct RunContext<'a> {
    /// The immutable run configuration.
    pub config: &'a EngineConfig,
    /// The command runner (carries the cancellation token).
    pub runner: &'a Runner,
    capabilities: RefCell<HashMap<(String, String), Capabilities>>,
    force_once_spent: Cell<bool>,
    local_pv: Cell<Option<bool>>,
}

impl<'a> RunContext<'a> {
    /// Creates a fresh context for one run.
    #[must_use]
    pub fn new(config: &'a EngineConfig, runner: &'a Runner) -> Self {
        Self {
            config,
            runner,
            capabilities: RefCell::new(HashMap::new()),
            force_once_spent: Cell::new(false),
            local_pv: Cell::new(None),
        }
    }

    /// Capabilities of `endpoint` with respect to `pool`, probed once per
    /// run and cached.
    ///
    /// # Errors
    ///
    /// Fails when `zfs` is unusable on the endpoint; probe failures for
    /// auxiliary programs only downgrade the returned capability set.
    pub fn capabilities(&self, endpoint: &Endpoint, pool: &str) -> Result<Capabilities> {
        let key = (endpoint.describe(), pool.to_owned());
        if let Some(cached) = self.capabilities.borrow().get(&key) {
            return Ok(*cached);
        }
        let probed = probe_capabilities(self.runner, endpoint, pool)?;
        self.capabilities.borrow_mut().insert(key, probed);
        Ok(probed)
    }

    /// Whether destructive conflict resolution may be used right now, and
    /// if the authorization comes from `--force-once`, spends it.
    #[must_use]
    pub fn take_force(&self) -> bool {
        if self.config.force {
            return true;
        }
        if self.config.force_once && !self.force_once_spent.get() {
            self.force_once_spent.set(true);
            return true;
        }
        false
    }

    /// Whether the initiator can contribute a `pv` stage. Only probed when
    /// a rate limit asks for one, and at most once per run.
    #[must_use]
    pub fn local_pv(&self) -> bool {
        if self.config.bwlimit.is_none() {
            return false;
        }
        if let Some(cached) = self.local_pv.get() {
            return cached;
        }
        let probed = probe_auxiliary(self.runner, &self.config.local_endpoint, ProgramRole::Pv);
        self.local_pv.set(Some(probed));
        probed
    }

    /// True when a dry-run mode forbids mutating either side.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run.is_some()
    }

    /// Logs a mutation that a dry run suppressed.
    pub fn note_suppressed(&self, action: &str, argv: &[String]) {
        info!(action, argv = ?argv, "dry run: suppressed");
    }
}
