//! Host endpoints: where a command runs and how its argv is wrapped.

use std::collections::HashMap;
use std::path::PathBuf;

use zmirror_core::{Error, Result};

use crate::quote::shell_join;

/// Whether an endpoint is the initiator itself or a host reached over SSH.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Location {
    /// Commands execute directly on the initiator.
    Local,
    /// Commands are wrapped in `ssh user@host`.
    Remote {
        /// Login user; `ssh` defaults apply when absent.
        user: Option<String>,
        /// Host name or address.
        host: String,
        /// TCP port; `ssh` defaults apply when absent.
        port: Option<u16>,
    },
}

/// SSH invocation options shared by every command against one endpoint.
#[derive(Clone, Debug, Default)]
pub struct SshOptions {
    /// Identity file passed as `-i`.
    pub private_key: Option<PathBuf>,
    /// Client configuration file passed as `-F`.
    pub config_file: Option<PathBuf>,
    /// Cipher specification passed as `-c`.
    pub cipher: Option<String>,
    /// Free-form extra options appended before the target operand.
    pub extra_opts: Vec<String>,
    /// Directory for control-master sockets. When set, every command adds
    /// `-S <dir>/%C -o ControlMaster=auto -o ControlPersist=90s` so the N
    /// commands issued per dataset share one connection.
    pub control_dir: Option<PathBuf>,
}

/// When `sudo` wrapping is applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SudoPolicy {
    /// Elevate state-changing ZFS commands unless already running as root.
    Auto,
    /// Never elevate (`--no-privilege-elevation`).
    Never,
}

/// Program roles an endpoint can resolve to concrete paths.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProgramRole {
    /// The `zfs` command itself. Mandatory.
    Zfs,
    /// `zpool`, used for feature probes.
    Zpool,
    /// The SSH client on the initiator.
    Ssh,
    /// `sudo` for privilege elevation.
    Sudo,
    /// `zstd` for on-the-wire compression.
    Zstd,
    /// `pv` for rate limiting and progress.
    Pv,
    /// `mbuffer` for smoothing bursty links.
    Mbuffer,
}

impl ProgramRole {
    /// Default program name looked up via `PATH`.
    #[must_use]
    pub const fn default_program(self) -> &'static str {
        match self {
            Self::Zfs => "zfs",
            Self::Zpool => "zpool",
            Self::Ssh => "ssh",
            Self::Sudo => "sudo",
            Self::Zstd => "zstd",
            Self::Pv => "pv",
            Self::Mbuffer => "mbuffer",
        }
    }
}

/// Program role → path map with `-` meaning "role disabled".
///
/// A disabled auxiliary role downgrades the pipeline; disabling `zfs` is
/// rejected up front by the CLI.
#[derive(Clone, Debug)]
pub struct ProgramMap {
    overrides: HashMap<ProgramRole, Option<String>>,
}

impl Default for ProgramMap {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }
}

impl ProgramMap {
    /// Overrides a role with a concrete path, or disables it with `None`.
    pub fn set(&mut self, role: ProgramRole, program: Option<String>) {
        self.overrides.insert(role, program);
    }

    /// Resolves a role to its program, or `None` when disabled.
    #[must_use]
    pub fn get(&self, role: ProgramRole) -> Option<&str> {
        match self.overrides.get(&role) {
            Some(Some(program)) => Some(program.as_str()),
            Some(None) => None,
            None => Some(role.default_program()),
        }
    }
}

/// Whether a command mutates ZFS state and is therefore subject to `sudo`
/// wrapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Elevation {
    /// Inventory and probe commands; never elevated.
    ReadOnly,
    /// create/rollback/destroy/send/receive/bookmark; elevated under
    /// [`SudoPolicy::Auto`] when not running as root.
    StateChanging,
}

/// One side of a replication: how to execute commands there.
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Local marker or SSH coordinates.
    pub location: Location,
    /// SSH invocation options; ignored for local endpoints.
    pub ssh: SshOptions,
    /// Privilege elevation policy.
    pub sudo: SudoPolicy,
    /// Program path overrides.
    pub programs: ProgramMap,
}

impl Endpoint {
    /// A local endpoint with default programs and automatic elevation.
    #[must_use]
    pub fn local() -> Self {
        Self {
            location: Location::Local,
            ssh: SshOptions::default(),
            sudo: SudoPolicy::Auto,
            programs: ProgramMap::default(),
        }
    }

    /// True when commands run directly on the initiator.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.location, Location::Local)
    }

    /// Human-readable endpoint description for logs and errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.location {
            Location::Local => "local".to_owned(),
            Location::Remote { user, host, port } => {
                let mut text = String::new();
                if let Some(user) = user {
                    text.push_str(user);
                    text.push('@');
                }
                text.push_str(host);
                if let Some(port) = port {
                    text.push(':');
                    text.push_str(&port.to_string());
                }
                text
            }
        }
    }

    /// Resolves a program role on this endpoint.
    #[must_use]
    pub fn program(&self, role: ProgramRole) -> Option<&str> {
        self.programs.get(role)
    }

    /// Resolves a mandatory role, failing when it was disabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] when the role was disabled with `-`.
    pub fn required_program(&self, role: ProgramRole) -> Result<&str> {
        self.program(role).ok_or_else(|| {
            Error::Usage(format!(
                "{} is required on endpoint {} but was disabled",
                role.default_program(),
                self.describe()
            ))
        })
    }

    /// Builds the argv that executes `argv` on this endpoint, applying sudo
    /// and SSH wrapping as required.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] when SSH wrapping is needed but the `ssh`
    /// role was disabled.
    pub fn build_command(&self, argv: &[String], elevation: Elevation) -> Result<Vec<String>> {
        let remote = self.sudo_wrap(argv, elevation);
        match &self.location {
            Location::Local => Ok(remote),
            Location::Remote { .. } => self.ssh_wrap(shell_join(&remote)),
        }
    }

    /// Builds the argv that runs several commands as one remote shell
    /// pipeline (`a | b | c`) on this endpoint.
    ///
    /// This is the single sanctioned use of a shell string: the transfer
    /// stages that live on one remote host must share the SSH hop, so they
    /// are joined with `|` from individually quoted tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] when called on a local endpoint (local
    /// stages each get their own process) or when `ssh` was disabled.
    pub fn build_shell_pipeline(
        &self,
        commands: &[(Vec<String>, Elevation)],
    ) -> Result<Vec<String>> {
        if self.is_local() {
            return Err(Error::Usage(
                "shell pipelines are only built for remote endpoints".to_owned(),
            ));
        }
        let joined = commands
            .iter()
            .map(|(argv, elevation)| shell_join(&self.sudo_wrap(argv, *elevation)))
            .collect::<Vec<_>>()
            .join(" | ");
        self.ssh_wrap(joined)
    }

    fn sudo_wrap(&self, argv: &[String], elevation: Elevation) -> Vec<String> {
        let mut wrapped = Vec::with_capacity(argv.len() + 2);
        if self.needs_elevation(elevation) {
            if let Some(sudo) = self.program(ProgramRole::Sudo) {
                wrapped.push(sudo.to_owned());
                // -n: fail instead of prompting; the engine has no tty to offer.
                wrapped.push("-n".to_owned());
            }
        }
        wrapped.extend(argv.iter().cloned());
        wrapped
    }

    fn ssh_wrap(&self, remote_command: String) -> Result<Vec<String>> {
        let Location::Remote { user, host, port } = &self.location else {
            return Err(Error::Usage(
                "ssh wrapping requested for a local endpoint".to_owned(),
            ));
        };
        let ssh = self.required_program(ProgramRole::Ssh)?;
        let mut wrapped = vec![ssh.to_owned(), "-oBatchMode=yes".to_owned()];
        if let Some(config) = &self.ssh.config_file {
            wrapped.push("-F".to_owned());
            wrapped.push(config.display().to_string());
        }
        if let Some(key) = &self.ssh.private_key {
            wrapped.push("-i".to_owned());
            wrapped.push(key.display().to_string());
        }
        if let Some(cipher) = &self.ssh.cipher {
            wrapped.push("-c".to_owned());
            wrapped.push(cipher.clone());
        }
        if let Some(port) = port {
            wrapped.push("-p".to_owned());
            wrapped.push(port.to_string());
        }
        if let Some(dir) = &self.ssh.control_dir {
            wrapped.push("-S".to_owned());
            wrapped.push(format!("{}/%C", dir.display()));
            wrapped.push("-oControlMaster=auto".to_owned());
            wrapped.push("-oControlPersist=90s".to_owned());
        }
        wrapped.extend(self.ssh.extra_opts.iter().cloned());
        let mut target = String::new();
        if let Some(user) = user {
            target.push_str(user);
            target.push('@');
        }
        target.push_str(host);
        wrapped.push(target);
        wrapped.push(remote_command);
        Ok(wrapped)
    }

    fn needs_elevation(&self, elevation: Elevation) -> bool {
        if elevation == Elevation::ReadOnly || self.sudo == SudoPolicy::Never {
            return false;
        }
        match &self.location {
            Location::Local => !runs_as_root(),
            // The remote euid is unknowable without a round trip; treat an
            // explicit root login as already privileged.
            Location::Remote { user, .. } => user.as_deref() != Some("root"),
        }
    }
}

#[cfg(unix)]
fn runs_as_root() -> bool {
    rustix::process::geteuid().is_root()
}

#[cfg(not(unix))]
fn runs_as_root() -> bool {
    false
}
