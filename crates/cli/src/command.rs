//! The clap command definition.

use clap::{Arg, ArgAction, Command, value_parser};

/// Builds the `zmirror` command line.
#[must_use]
pub(crate) fn clap_command() -> Command {
    Command::new("zmirror")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Replicate ZFS snapshot trees locally or across SSH")
        .long_about(
            "Replicates ZFS snapshot trees from a source dataset to a destination \
             dataset: a baseline full send the first time, then only the incremental \
             changes since the most recent common snapshot. The source is read-only; \
             the destination is append-only unless --force or --delete-missing-* \
             explicitly authorize destructive reconciliation.",
        )
        .arg(
            Arg::new("datasets")
                .value_name("SRC_DATASET DST_DATASET")
                .num_args(0..)
                .help(
                    "Dataset pairs, [[user@]host:]pool/path each; host '-' means local. \
                     A single '+FILE' argument loads tab-separated pairs instead",
                ),
        )
        .arg(flag("recursive", 'r', "Replicate the whole source dataset tree"))
        .arg(flag_long("skip-parent", "With --recursive, skip the root dataset itself"))
        .arg(flag_long(
            "force",
            "Roll back or destroy conflicting destination snapshots",
        ))
        .arg(flag_long(
            "force-once",
            "Like --force, but allow the destructive resolution at most once",
        ))
        .arg(flag_long(
            "force-unmount",
            "Add -f to rollback/destroy so busy mounts are unmounted",
        ))
        .arg(flag_long(
            "no-stream",
            "Send a single increment to the latest snapshot, skipping intermediates",
        ))
        .arg(flag_long(
            "no-create-bookmark",
            "Do not create a source bookmark after successful replication",
        ))
        .arg(flag_long(
            "no-use-bookmark",
            "Ignore source bookmarks when resolving the common base",
        ))
        .arg(
            flag_long(
                "no-privilege-elevation",
                "Never wrap state-changing ZFS commands in sudo",
            )
            .short('p'),
        )
        .arg(
            Arg::new("skip-missing-snapshots")
                .long("skip-missing-snapshots")
                .value_name("MODE")
                .value_parser(["fail", "dataset", "continue"])
                .default_value("fail")
                .help("Policy when a source dataset has no matching snapshots"),
        )
        .arg(
            Arg::new("skip-on-error")
                .long("skip-on-error")
                .value_name("MODE")
                .value_parser(["fail", "tree", "dataset"])
                .default_value("dataset")
                .help("Failure containment: abort, skip the subtree, or skip the dataset"),
        )
        .arg(flag_long(
            "skip-replication",
            "Skip the replication phase; reconciliation passes still run",
        ))
        .arg(flag_long(
            "delete-missing-snapshots",
            "Destroy destination snapshots that no longer exist on the source",
        ))
        .arg(flag_long(
            "delete-missing-datasets",
            "Destroy destination datasets that no longer exist on the source",
        ))
        .arg(
            Arg::new("dryrun")
                .long("dryrun")
                .short('n')
                .value_name("MODE")
                .value_parser(["send", "recv"])
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("send")
                .help("Plan without mutating: 'send' runs nothing, 'recv' discards on receive"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Increase verbosity; repeatable"),
        )
        .arg(flag("quiet", 'q', "Errors only"))
        .arg(list_arg(
            "include-dataset",
            "DATASET",
            "Select this dataset (and descendants); literal name, leading '/' for absolute",
        ))
        .arg(list_arg(
            "exclude-dataset",
            "DATASET",
            "Deselect this dataset and its descendants; literal name",
        ))
        .arg(list_arg(
            "include-dataset-regex",
            "REGEX",
            "Select datasets whose relative path matches; '!' negates",
        ))
        .arg(list_arg(
            "exclude-dataset-regex",
            "REGEX",
            "Deselect datasets whose relative path matches; '!' negates",
        ))
        .arg(list_arg(
            "include-snapshot-regex",
            "REGEX",
            "Replicate only snapshots whose name matches",
        ))
        .arg(list_arg(
            "exclude-snapshot-regex",
            "REGEX",
            "Never replicate snapshots whose name matches",
        ))
        .arg(
            Arg::new("exclude-dataset-property")
                .long("exclude-dataset-property")
                .value_name("PROPERTY")
                .help(
                    "ZFS user property consulted per dataset; a value of 'false' or 'off' \
                     excludes the dataset and its subtree",
                ),
        )
        .arg(list_arg(
            "include-envvar-regex",
            "REGEX",
            "Keep only matching environment variables for subprocesses",
        ))
        .arg(list_arg(
            "exclude-envvar-regex",
            "REGEX",
            "Drop matching environment variables for subprocesses",
        ))
        .arg(
            Arg::new("zfs-send-program-opts")
                .long("zfs-send-program-opts")
                .value_name("OPTS")
                .help("Extra options appended to zfs send, space separated"),
        )
        .arg(
            Arg::new("zfs-receive-program-opts")
                .long("zfs-receive-program-opts")
                .value_name("OPTS")
                .help("Extra options appended to zfs receive, space separated"),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .value_name("N")
                .value_parser(value_parser!(u32))
                .default_value("0")
                .help("Re-attempts per dataset after transient failures"),
        )
        .arg(duration_arg(
            "retry-min-sleep-secs",
            "0.125",
            "Lower bound of the backoff sleep",
        ))
        .arg(duration_arg(
            "retry-max-sleep-secs",
            "300",
            "Upper clamp of the backoff sleep",
        ))
        .arg(duration_arg(
            "retry-max-elapsed-secs",
            "3600",
            "Give up retrying one dataset after this much wall-clock time",
        ))
        .arg(
            Arg::new("bwlimit")
                .long("bwlimit")
                .value_name("RATE")
                .help("Rate-limit the transfer through pv, e.g. 100m"),
        )
        .arg(ssh_arg("ssh-src-user", "USER"))
        .arg(ssh_arg("ssh-dst-user", "USER"))
        .arg(ssh_arg("ssh-src-host", "HOST"))
        .arg(ssh_arg("ssh-dst-host", "HOST"))
        .arg(
            Arg::new("ssh-src-port")
                .long("ssh-src-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("ssh-dst-port")
                .long("ssh-dst-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16)),
        )
        .arg(ssh_arg("ssh-src-private-key", "FILE"))
        .arg(ssh_arg("ssh-dst-private-key", "FILE"))
        .arg(ssh_arg("ssh-src-config-file", "FILE"))
        .arg(ssh_arg("ssh-dst-config-file", "FILE"))
        .arg(ssh_arg("ssh-src-extra-opts", "OPTS"))
        .arg(ssh_arg("ssh-dst-extra-opts", "OPTS"))
        .arg(ssh_arg("ssh-cipher", "SPEC"))
        .arg(program_arg("zfs"))
        .arg(program_arg("zpool"))
        .arg(program_arg("ssh"))
        .arg(program_arg("sudo"))
        .arg(program_arg("zstd"))
        .arg(program_arg("pv"))
        .arg(program_arg("mbuffer"))
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .help("Log directory; default ~/.zmirror/log"),
        )
}

fn flag(name: &'static str, short: char, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .short(short)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn flag_long(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn list_arg(name: &'static str, value_name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name(value_name)
        .action(ArgAction::Append)
        .help(help)
}

fn ssh_arg(name: &'static str, value_name: &'static str) -> Arg {
    Arg::new(name).long(name).value_name(value_name)
}

fn duration_arg(name: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("SECS")
        .value_parser(value_parser!(f64))
        .default_value(default)
        .help(help)
}

fn program_arg(role: &'static str) -> Arg {
    Arg::new(format!("{role}-program"))
        .long(format!("{role}-program"))
        .value_name("PATH")
        .help("Override the program path; '-' disables the role")
}
