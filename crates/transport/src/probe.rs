//! Per-endpoint capability detection.
//!
//! Probes run once per endpoint per run; the engine caches the result in its
//! run context. A missing auxiliary program silently downgrades the transfer
//! pipeline; a missing `zfs` is fatal.

use tracing::debug;
use zmirror_core::Result;

use crate::endpoint::{Elevation, Endpoint, ProgramRole};
use crate::process::{RunOptions, Runner};

/// What an endpoint can contribute to the transfer pipeline.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    /// `zstd` is available for wire compression.
    pub zstd: bool,
    /// `pv` is available for rate limiting and progress display.
    pub pv: bool,
    /// `mbuffer` is available for buffering.
    pub mbuffer: bool,
    /// The probed pool has the `bookmarks` feature enabled or active.
    pub bookmarks: bool,
}

/// Probes `endpoint`, verifying `zfs` and detecting auxiliary programs and
/// the `bookmarks` pool feature of `pool`.
///
/// # Errors
///
/// Fails when `zfs` itself cannot be executed on the endpoint; auxiliary
/// probe failures only clear the corresponding capability.
pub fn probe_capabilities(runner: &Runner, endpoint: &Endpoint, pool: &str) -> Result<Capabilities> {
    let zfs = endpoint.required_program(ProgramRole::Zfs)?;
    runner.run(
        endpoint,
        &[zfs.to_owned(), "--version".to_owned()],
        Elevation::ReadOnly,
        RunOptions::metadata(),
    )?;

    Ok(Capabilities {
        zstd: probe_auxiliary(runner, endpoint, ProgramRole::Zstd),
        pv: probe_auxiliary(runner, endpoint, ProgramRole::Pv),
        mbuffer: probe_auxiliary(runner, endpoint, ProgramRole::Mbuffer),
        bookmarks: probe_bookmarks(runner, endpoint, pool),
    })
}

/// Whether an auxiliary program role is usable on `endpoint`.
///
/// Unlike [`probe_capabilities`] this does not require `zfs`, which matters
/// for a pull-push initiator that only contributes a `pv` stage.
#[must_use]
pub fn probe_auxiliary(runner: &Runner, endpoint: &Endpoint, role: ProgramRole) -> bool {
    let Some(program) = endpoint.program(role) else {
        return false;
    };
    let available = runner
        .run(
            endpoint,
            &[program.to_owned(), "--version".to_owned()],
            Elevation::ReadOnly,
            RunOptions::metadata(),
        )
        .is_ok();
    if !available {
        debug!(
            endpoint = %endpoint.describe(),
            program = role.default_program(),
            "auxiliary program unavailable, downgrading pipeline"
        );
    }
    available
}

fn probe_bookmarks(runner: &Runner, endpoint: &Endpoint, pool: &str) -> bool {
    let Some(zpool) = endpoint.program(ProgramRole::Zpool) else {
        return false;
    };
    let argv = vec![
        zpool.to_owned(),
        "get".to_owned(),
        "-Hp".to_owned(),
        "-o".to_owned(),
        "value".to_owned(),
        "feature@bookmarks".to_owned(),
        pool.to_owned(),
    ];
    match runner.run(endpoint, &argv, Elevation::ReadOnly, RunOptions::metadata()) {
        Ok(output) => {
            let value = output.stdout.trim();
            value == "enabled" || value == "active"
        }
        Err(err) => {
            debug!(
                endpoint = %endpoint.describe(),
                pool,
                %err,
                "bookmark feature probe failed, assuming unsupported"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ProgramMap;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// Endpoint whose `zfs`/`zpool` are shell stubs in a temp dir.
    fn stub_endpoint(dir: &std::path::Path, zpool_value: &str) -> Endpoint {
        let zfs = dir.join("zfs");
        fs::write(&zfs, "#!/bin/sh\nexit 0\n").expect("write zfs stub");
        let zpool = dir.join("zpool");
        fs::write(&zpool, format!("#!/bin/sh\necho {zpool_value}\n")).expect("write zpool stub");
        for stub in [&zfs, &zpool] {
            fs::set_permissions(stub, fs::Permissions::from_mode(0o755)).expect("chmod stub");
        }

        let mut programs = ProgramMap::default();
        programs.set(ProgramRole::Zfs, Some(zfs.display().to_string()));
        programs.set(ProgramRole::Zpool, Some(zpool.display().to_string()));
        programs.set(ProgramRole::Zstd, None);
        programs.set(ProgramRole::Pv, None);
        programs.set(
            ProgramRole::Mbuffer,
            Some(dir.join("missing-mbuffer").display().to_string()),
        );

        let mut endpoint = Endpoint::local();
        endpoint.programs = programs;
        endpoint
    }

    #[test]
    fn disabled_and_missing_programs_downgrade_silently() {
        let dir = tempfile::tempdir().expect("tempdir");
        let endpoint = stub_endpoint(dir.path(), "active");
        let caps = probe_capabilities(&Runner::default(), &endpoint, "tank")
            .expect("probe succeeds");
        assert!(!caps.zstd, "disabled role must probe false");
        assert!(!caps.pv, "disabled role must probe false");
        assert!(!caps.mbuffer, "missing binary must probe false");
        assert!(caps.bookmarks, "active feature must probe true");
    }

    #[test]
    fn disabled_bookmark_feature_probes_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let endpoint = stub_endpoint(dir.path(), "disabled");
        let caps = probe_capabilities(&Runner::default(), &endpoint, "tank")
            .expect("probe succeeds");
        assert!(!caps.bookmarks);
    }

    #[test]
    fn missing_zfs_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut endpoint = Endpoint::local();
        endpoint.programs.set(
            ProgramRole::Zfs,
            Some(dir.path().join("missing-zfs").display().to_string()),
        );
        assert!(probe_capabilities(&Runner::default(), &endpoint, "tank").is_err());
    }
}
