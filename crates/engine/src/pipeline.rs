//! Transfer pipeline assembly.
//!
//! Builds the `zfs send → … → zfs receive` chain for one send step. Stages
//! that live on a remote host are folded into that host's single SSH leg as
//! a remote shell pipeline; in local mode the chain collapses to
//! `zfs send | zfs receive` with an optional `pv` in the middle. Missing
//! auxiliary programs downgrade the chain silently.

use zmirror_core::{Dataset, Result, SnapshotEntry};
use zmirror_transport::{
    Capabilities, Elevation, Endpoint, Pipeline, ProgramRole, Stage,
};

use crate::config::{DryRun, EngineConfig};

/// One send operation within a dataset's replication.
#[derive(Clone, Debug)]
pub struct SendStep {
    /// Incremental origin; `None` makes this a full send.
    pub base: Option<SnapshotEntry>,
    /// Short name of the target snapshot.
    pub target: String,
    /// Use `-I` (send intermediate snapshots) instead of `-i`.
    pub intermediates: bool,
}

impl SendStep {
    /// Human-readable description for logs.
    #[must_use]
    pub fn describe(&self, source: &Dataset) -> String {
        match &self.base {
            None => format!("full send of {}", source.snapshot_name(&self.target)),
            Some(base) => format!(
                "incremental {}{} {} -> @{}",
                if self.intermediates { "-I " } else { "-i " },
                base.origin_operand(),
                source.name(),
                self.target
            ),
        }
    }
}

/// Everything the builder needs to know about the two sides.
pub struct TransferSpec<'a> {
    /// Endpoint the source dataset lives on.
    pub source_endpoint: &'a Endpoint,
    /// Endpoint the destination dataset lives on.
    pub dest_endpoint: &'a Endpoint,
    /// The initiator, which contributes the `pv` stage.
    pub local_endpoint: &'a Endpoint,
    /// Source dataset.
    pub source: &'a Dataset,
    /// Destination dataset.
    pub destination: &'a Dataset,
    /// Probed capabilities of the source endpoint.
    pub caps_source: Capabilities,
    /// Probed capabilities of the destination endpoint.
    pub caps_dest: Capabilities,
    /// Whether `pv` is usable on the initiator.
    pub local_pv: bool,
    /// Add `-F` to the receive: set when a forced full send targets a
    /// destination dataset that already exists.
    pub recv_force: bool,
}

/// Assembles the transfer pipeline for one step.
///
/// # Errors
///
/// Fails when a mandatory program role was disabled.
pub fn build_transfer(
    config: &EngineConfig,
    spec: &TransferSpec<'_>,
    step: &SendStep,
) -> Result<Pipeline> {
    let network = !spec.source_endpoint.is_local() || !spec.dest_endpoint.is_local();
    // Compression needs a compressor on the source side and a matching
    // decompressor on the destination side; anything else ships raw bytes.
    let compress = network && spec.caps_source.zstd && spec.caps_dest.zstd;

    let mut pipeline = Pipeline::new();

    // Source side: send, then compressor and buffer while still on the
    // source host.
    let mut src_commands: Vec<(Vec<String>, Elevation)> = Vec::new();
    src_commands.push((send_argv(config, spec, step)?, Elevation::StateChanging));
    if compress {
        if let Some(zstd) = spec.source_endpoint.program(ProgramRole::Zstd) {
            src_commands.push((
                vec![zstd.to_owned(), "-c".to_owned(), "-1".to_owned()],
                Elevation::ReadOnly,
            ));
        }
    }
    if network && spec.caps_source.mbuffer {
        if let Some(mbuffer) = spec.source_endpoint.program(ProgramRole::Mbuffer) {
            src_commands.push((mbuffer_argv(mbuffer), Elevation::ReadOnly));
        }
    }
    push_side(&mut pipeline, spec.source_endpoint, src_commands, "send")?;

    // Initiator: optional rate limit / progress.
    if spec.local_pv {
        if let Some(pv) = spec.local_endpoint.program(ProgramRole::Pv) {
            let mut argv = vec![pv.to_owned()];
            if let Some(rate) = &config.bwlimit {
                argv.push("--rate-limit".to_owned());
                argv.push(rate.clone());
            }
            pipeline.push(Stage::new("pv", argv).with_inherited_stderr());
        }
    }

    // Destination side: buffer, then decompressor, then receive.
    let mut dst_commands: Vec<(Vec<String>, Elevation)> = Vec::new();
    if network && spec.caps_dest.mbuffer {
        if let Some(mbuffer) = spec.dest_endpoint.program(ProgramRole::Mbuffer) {
            dst_commands.push((mbuffer_argv(mbuffer), Elevation::ReadOnly));
        }
    }
    if compress {
        if let Some(zstd) = spec.dest_endpoint.program(ProgramRole::Zstd) {
            dst_commands.push((
                vec![zstd.to_owned(), "-dc".to_owned()],
                Elevation::ReadOnly,
            ));
        }
    }
    dst_commands.push((recv_argv(config, spec)?, Elevation::StateChanging));
    push_side(&mut pipeline, spec.dest_endpoint, dst_commands, "receive")?;

    Ok(pipeline)
}

/// Folds one side's commands into the pipeline: a single SSH leg for a
/// remote endpoint, one local stage per command otherwise.
fn push_side(
    pipeline: &mut Pipeline,
    endpoint: &Endpoint,
    commands: Vec<(Vec<String>, Elevation)>,
    leg_label: &str,
) -> Result<()> {
    if endpoint.is_local() {
        for (argv, elevation) in commands {
            let label = argv
                .first()
                .map_or_else(|| leg_label.to_owned(), |program| program_label(program));
            pipeline.push(Stage::new(label, endpoint.build_command(&argv, elevation)?));
        }
    } else {
        pipeline.push(Stage::new(
            leg_label,
            endpoint.build_shell_pipeline(&commands)?,
        ));
    }
    Ok(())
}

/// Last path component of a program, for stage labels.
fn program_label(program: &str) -> String {
    program
        .rsplit('/')
        .next()
        .unwrap_or(program)
        .to_owned()
}

fn send_argv(
    config: &EngineConfig,
    spec: &TransferSpec<'_>,
    step: &SendStep,
) -> Result<Vec<String>> {
    let zfs = spec.source_endpoint.required_program(ProgramRole::Zfs)?;
    let mut argv = vec![zfs.to_owned(), "send".to_owned()];
    argv.extend(config.send_opts.iter().cloned());
    if let Some(base) = &step.base {
        argv.push(if step.intermediates { "-I" } else { "-i" }.to_owned());
        argv.push(base.origin_operand());
    }
    argv.push(spec.source.snapshot_name(&step.target));
    Ok(argv)
}

fn recv_argv(config: &EngineConfig, spec: &TransferSpec<'_>) -> Result<Vec<String>> {
    let zfs = spec.dest_endpoint.required_program(ProgramRole::Zfs)?;
    let mut argv = vec![zfs.to_owned(), "receive".to_owned()];
    argv.extend(config.recv_opts.iter().cloned());
    // Never mount what we receive; replicas are not working sets.
    argv.push("-u".to_owned());
    if spec.recv_force {
        argv.push("-F".to_owned());
    }
    if config.dry_run == Some(DryRun::Recv) {
        argv.push("-n".to_owned());
    }
    argv.push(spec.destination.name().to_owned());
    Ok(argv)
}

fn mbuffer_argv(program: &str) -> Vec<String> {
    let memory =
        std::env::var("ZMIRROR_MBUFFER_SIZE").unwrap_or_else(|_| "128M".to_owned());
    vec![
        program.to_owned(),
        "-q".to_owned(),
        "-s".to_owned(),
        "128k".to_owned(),
        "-m".to_owned(),
        memory,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use zmirror_transport::{Location, SudoPolicy};

    fn remote(host: &str) -> Endpoint {
        let mut endpoint = Endpoint::local();
        endpoint.location = Location::Remote {
            user: Some("root".to_owned()),
            host: host.to_owned(),
            port: None,
        };
        endpoint.sudo = SudoPolicy::Never;
        endpoint
    }

    fn full_caps() -> Capabilities {
        Capabilities {
            zstd: true,
            pv: true,
            mbuffer: true,
            bookmarks: true,
        }
    }

    fn spec<'a>(
        src: &'a Endpoint,
        dst: &'a Endpoint,
        local: &'a Endpoint,
        source: &'a Dataset,
        destination: &'a Dataset,
        caps_source: Capabilities,
        caps_dest: Capabilities,
    ) -> TransferSpec<'a> {
        TransferSpec {
            source_endpoint: src,
            dest_endpoint: dst,
            local_endpoint: local,
            source,
            destination,
            caps_source,
            caps_dest,
            local_pv: false,
            recv_force: false,
        }
    }

    fn full_step() -> SendStep {
        SendStep {
            base: None,
            target: "s3".to_owned(),
            intermediates: false,
        }
    }

    #[test]
    fn local_mode_collapses_to_send_receive() {
        let local = Endpoint::local();
        let source = Dataset::parse("tank1/foo").expect("src");
        let destination = Dataset::parse("tank2/foo").expect("dst");
        let config = EngineConfig::new(Vec::new());
        let spec = spec(
            &local,
            &local,
            &local,
            &source,
            &destination,
            full_caps(),
            full_caps(),
        );

        let pipeline = build_transfer(&config, &spec, &full_step()).expect("builds");
        let labels: Vec<&str> = pipeline.stages().iter().map(Stage::label).collect();
        assert_eq!(labels, ["zfs", "zfs"], "no network stages in local mode");
        assert!(pipeline.stages()[0].argv().contains(&"send".to_owned()));
        assert!(pipeline.stages()[1].argv().contains(&"receive".to_owned()));
        assert!(pipeline.stages()[1].argv().contains(&"-u".to_owned()));
    }

    #[test]
    fn pull_push_has_two_ssh_legs_and_nothing_local() {
        let src = remote("host-a");
        let dst = remote("host-b");
        let local = Endpoint::local();
        let source = Dataset::parse("tank1/foo").expect("src");
        let destination = Dataset::parse("tank2/foo").expect("dst");
        let config = EngineConfig::new(Vec::new());
        let spec = spec(
            &src,
            &dst,
            &local,
            &source,
            &destination,
            full_caps(),
            full_caps(),
        );

        let pipeline = build_transfer(&config, &spec, &full_step()).expect("builds");
        let labels: Vec<&str> = pipeline.stages().iter().map(Stage::label).collect();
        assert_eq!(labels, ["send", "receive"]);

        let send_leg = pipeline.stages()[0].argv().last().expect("remote command");
        assert!(send_leg.contains("zfs send"));
        assert!(send_leg.contains("zstd -c -1"));
        assert!(send_leg.contains("mbuffer"));

        let recv_leg = pipeline.stages()[1].argv().last().expect("remote command");
        assert!(recv_leg.contains("mbuffer"));
        assert!(recv_leg.contains("zstd -dc"));
        assert!(recv_leg.contains("zfs receive"));
    }

    #[test]
    fn missing_auxiliaries_downgrade_the_chain() {
        let src = remote("host-a");
        let dst = remote("host-b");
        let local = Endpoint::local();
        let source = Dataset::parse("tank1/foo").expect("src");
        let destination = Dataset::parse("tank2/foo").expect("dst");
        let config = EngineConfig::new(Vec::new());
        // Destination lacks zstd: compression must vanish on both sides.
        let mut caps_dest = full_caps();
        caps_dest.zstd = false;
        caps_dest.mbuffer = false;
        let spec = spec(
            &src,
            &dst,
            &local,
            &source,
            &destination,
            full_caps(),
            caps_dest,
        );

        let pipeline = build_transfer(&config, &spec, &full_step()).expect("builds");
        let send_leg = pipeline.stages()[0].argv().last().expect("remote command");
        assert!(!send_leg.contains("zstd"), "one-sided compression is useless");
        let recv_leg = pipeline.stages()[1].argv().last().expect("remote command");
        assert!(!recv_leg.contains("zstd"));
        assert!(!recv_leg.contains("mbuffer"));
    }

    #[test]
    fn incremental_steps_use_the_origin_operand() {
        use zmirror_core::{EntryKind, SnapshotEntry};
        let local = Endpoint::local();
        let source = Dataset::parse("tank1/foo").expect("src");
        let destination = Dataset::parse("tank2/foo").expect("dst");
        let config = EngineConfig::new(Vec::new());
        let spec = spec(
            &local,
            &local,
            &local,
            &source,
            &destination,
            full_caps(),
            full_caps(),
        );
        let step = SendStep {
            base: Some(SnapshotEntry {
                dataset: source.clone(),
                name: "s1".to_owned(),
                guid: 1,
                createtxg: 1,
                kind: EntryKind::Bookmark,
            }),
            target: "s3".to_owned(),
            intermediates: false,
        };

        let pipeline = build_transfer(&config, &spec, &step).expect("builds");
        let send = pipeline.stages()[0].argv();
        let i_pos = send.iter().position(|arg| arg == "-i").expect("-i present");
        assert_eq!(send[i_pos + 1], "#s1");
        assert_eq!(send.last().expect("target"), "tank1/foo@s3");
    }

    #[test]
    fn dryrun_recv_discards_on_the_receive_side() {
        let local = Endpoint::local();
        let source = Dataset::parse("tank1/foo").expect("src");
        let destination = Dataset::parse("tank2/foo").expect("dst");
        let mut config = EngineConfig::new(Vec::new());
        config.dry_run = Some(DryRun::Recv);
        let spec = spec(
            &local,
            &local,
            &local,
            &source,
            &destination,
            full_caps(),
            full_caps(),
        );

        let pipeline = build_transfer(&config, &spec, &full_step()).expect("builds");
        assert!(pipeline.stages()[1].argv().contains(&"-n".to_owned()));
    }

    #[test]
    fn bwlimit_inserts_a_pv_stage_with_inherited_stderr() {
        let src = remote("host-a");
        let dst = remote("host-b");
        let local = Endpoint::local();
        let source = Dataset::parse("tank1/foo").expect("src");
        let destination = Dataset::parse("tank2/foo").expect("dst");
        let mut config = EngineConfig::new(Vec::new());
        config.bwlimit = Some("100m".to_owned());
        let mut spec = spec(
            &src,
            &dst,
            &local,
            &source,
            &destination,
            full_caps(),
            full_caps(),
        );
        spec.local_pv = true;

        let pipeline = build_transfer(&config, &spec, &full_step()).expect("builds");
        let labels: Vec<&str> = pipeline.stages().iter().map(Stage::label).collect();
        assert_eq!(labels, ["send", "pv", "receive"]);
        let pv = pipeline.stages()[1].argv();
        assert!(pv.contains(&"--rate-limit".to_owned()));
        assert!(pv.contains(&"100m".to_owned()));
    }
}
