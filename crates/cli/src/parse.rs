//! Translation from parsed arguments to an [`EngineConfig`].

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::ArgMatches;
use zmirror_core::{Dataset, Error, Result};
use zmirror_engine::{
    DryRun, EngineConfig, ErrorScope, MissingSnapshotsPolicy, ReplicationJob, RetryPolicy,
};
use zmirror_filters::{DatasetFilter, NameFilter, Rule, RuleList};
use zmirror_logging::{LogLayout, Verbosity};
use zmirror_transport::{Endpoint, Location, ProgramMap, ProgramRole, SshOptions, SudoPolicy};

/// Environment variable prefix for advanced knobs; unrecognized names are
/// ignored.
const ENV_PREFIX: &str = "ZMIRROR_";

/// Datasets matching this are temporary working sets nobody wants
/// replicated; an explicit `--exclude-dataset-regex` replaces it.
const DEFAULT_EXCLUDE_DATASET_REGEX: &str = "(.*/)?[Tt][Ee]?[Mm][Pp][-_]?[0-9]*";

/// The fully resolved invocation.
pub(crate) struct Invocation {
    pub config: EngineConfig,
    pub verbosity: Verbosity,
    pub log_dir: PathBuf,
}

/// Builds the engine configuration from the parsed command line.
pub(crate) fn parse(matches: &ArgMatches) -> Result<Invocation> {
    let programs = parse_programs(matches)?;
    let control_dir = ssh_control_dir();

    let jobs = parse_jobs(matches, &programs, control_dir.as_deref())?;
    if jobs.is_empty() {
        return Err(Error::Usage(
            "expected SRC_DATASET DST_DATASET pairs (or a single +FILE argument)".to_owned(),
        ));
    }

    let mut local_endpoint = Endpoint::local();
    local_endpoint.programs = programs.clone();
    if matches.get_flag("no-privilege-elevation") {
        local_endpoint.sudo = SudoPolicy::Never;
    }

    apply_envvar_filter(matches)?;

    let mut config = EngineConfig::new(jobs);
    config.local_endpoint = Arc::new(local_endpoint);
    config.recursive = matches.get_flag("recursive");
    config.skip_parent = matches.get_flag("skip-parent");
    config.force = matches.get_flag("force");
    config.force_once = matches.get_flag("force-once");
    config.force_unmount = matches.get_flag("force-unmount");
    config.no_stream = matches.get_flag("no-stream");
    config.create_bookmarks = !matches.get_flag("no-create-bookmark");
    config.use_bookmarks = !matches.get_flag("no-use-bookmark");
    config.skip_replication = matches.get_flag("skip-replication");
    config.delete_missing_snapshots = matches.get_flag("delete-missing-snapshots");
    config.delete_missing_datasets = matches.get_flag("delete-missing-datasets");
    config.skip_missing_snapshots = match required_str(matches, "skip-missing-snapshots") {
        "dataset" => MissingSnapshotsPolicy::Dataset,
        "continue" => MissingSnapshotsPolicy::Continue,
        _ => MissingSnapshotsPolicy::Fail,
    };
    config.skip_on_error = match required_str(matches, "skip-on-error") {
        "fail" => ErrorScope::Fail,
        "tree" => ErrorScope::Tree,
        _ => ErrorScope::Dataset,
    };
    config.dry_run = matches
        .get_one::<String>("dryrun")
        .map(|mode| match mode.as_str() {
            "recv" => DryRun::Recv,
            _ => DryRun::Send,
        });

    config.dataset_filter = parse_dataset_filter(matches)?;
    config.exclude_dataset_property = matches
        .get_one::<String>("exclude-dataset-property")
        .cloned();
    config.snapshot_filter = NameFilter::new(
        compile_rules(&expanded_list(matches, "include-snapshot-regex")?)?,
        compile_rules(&expanded_list(matches, "exclude-snapshot-regex")?)?,
    );

    config.send_opts = split_opts(matches.get_one::<String>("zfs-send-program-opts"));
    config.recv_opts = split_opts(matches.get_one::<String>("zfs-receive-program-opts"));
    config.bwlimit = matches.get_one::<String>("bwlimit").cloned();

    config.retry = RetryPolicy {
        retries: *matches.get_one::<u32>("retries").unwrap_or(&0),
        min_sleep: secs(matches, "retry-min-sleep-secs"),
        max_sleep: secs(matches, "retry-max-sleep-secs"),
        max_elapsed: secs(matches, "retry-max-elapsed-secs"),
    };
    if config.retry.max_sleep < config.retry.min_sleep {
        return Err(Error::Usage(
            "--retry-max-sleep-secs must be at least --retry-min-sleep-secs".to_owned(),
        ));
    }

    let verbosity =
        Verbosity::from_flags(matches.get_count("verbose"), matches.get_flag("quiet"));
    let log_dir = matches
        .get_one::<String>("log-dir")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(format!("{ENV_PREFIX}LOG_DIR")).map(PathBuf::from))
        .unwrap_or_else(LogLayout::default_dir);

    Ok(Invocation {
        config,
        verbosity,
        log_dir,
    })
}

fn required_str<'a>(matches: &'a ArgMatches, id: &str) -> &'a str {
    matches
        .get_one::<String>(id)
        .map_or("", String::as_str)
}

fn secs(matches: &ArgMatches, id: &str) -> Duration {
    Duration::from_secs_f64(*matches.get_one::<f64>(id).unwrap_or(&0.0))
}

fn split_opts(value: Option<&String>) -> Vec<String> {
    value
        .map(|opts| opts.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// A dataset argument split into its optional host part and the dataset.
struct DatasetSpec {
    user: Option<String>,
    host: Option<String>,
    dataset: Dataset,
}

/// Parses `[[user@]host:]pool/path`; host `-` (or no `:`) means local.
fn parse_dataset_spec(text: &str) -> Result<DatasetSpec> {
    let (host_part, dataset_part) = match text.split_once(':') {
        Some((host, dataset)) => (Some(host), dataset),
        None => (None, text),
    };
    let dataset = Dataset::parse(dataset_part)?;
    let Some(host_part) = host_part else {
        return Ok(DatasetSpec {
            user: None,
            host: None,
            dataset,
        });
    };
    if host_part == "-" || host_part.is_empty() {
        return Ok(DatasetSpec {
            user: None,
            host: None,
            dataset,
        });
    }
    let (user, host) = match host_part.split_once('@') {
        Some((user, host)) if !user.is_empty() => (Some(user.to_owned()), host),
        Some((_, host)) => (None, host),
        None => (None, host_part),
    };
    if host.is_empty() {
        return Err(Error::Usage(format!("empty host in dataset spec: {text}")));
    }
    Ok(DatasetSpec {
        user,
        host: Some(host.to_owned()),
        dataset,
    })
}

/// Which side of a job an endpoint belongs to; selects the flag family.
#[derive(Clone, Copy)]
enum Side {
    Source,
    Dest,
}

impl Side {
    fn flag(self, suffix: &str) -> String {
        match self {
            Self::Source => format!("ssh-src-{suffix}"),
            Self::Dest => format!("ssh-dst-{suffix}"),
        }
    }
}

fn endpoint_for(
    matches: &ArgMatches,
    side: Side,
    spec: &DatasetSpec,
    programs: &ProgramMap,
    control_dir: Option<&std::path::Path>,
) -> Endpoint {
    let flag_host = matches.get_one::<String>(&side.flag("host")).cloned();
    let host = spec.host.clone().or(flag_host);

    let location = match host {
        None => Location::Local,
        Some(host) => Location::Remote {
            user: spec
                .user
                .clone()
                .or_else(|| matches.get_one::<String>(&side.flag("user")).cloned()),
            host,
            port: matches.get_one::<u16>(&side.flag("port")).copied(),
        },
    };

    let ssh = SshOptions {
        private_key: matches
            .get_one::<String>(&side.flag("private-key"))
            .map(PathBuf::from),
        config_file: matches
            .get_one::<String>(&side.flag("config-file"))
            .map(PathBuf::from),
        cipher: matches.get_one::<String>("ssh-cipher").cloned(),
        extra_opts: split_opts(matches.get_one::<String>(&side.flag("extra-opts"))),
        control_dir: control_dir.map(std::path::Path::to_path_buf),
    };

    Endpoint {
        location,
        ssh,
        sudo: if matches.get_flag("no-privilege-elevation") {
            SudoPolicy::Never
        } else {
            SudoPolicy::Auto
        },
        programs: programs.clone(),
    }
}

fn parse_jobs(
    matches: &ArgMatches,
    programs: &ProgramMap,
    control_dir: Option<&std::path::Path>,
) -> Result<Vec<ReplicationJob>> {
    let mut args: Vec<String> = matches
        .get_many::<String>("datasets")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    // `+FILE` indirection: tab-separated pairs, one per line.
    if args.len() == 1 {
        if let Some(path) = args[0].strip_prefix('+') {
            args = read_pair_file(path)?;
        }
    }
    if args.len() % 2 != 0 {
        return Err(Error::Usage(format!(
            "dataset arguments must come in SRC DST pairs, got {}",
            args.len()
        )));
    }

    let mut jobs = Vec::with_capacity(args.len() / 2);
    for pair in args.chunks(2) {
        let source_spec = parse_dataset_spec(&pair[0])?;
        let dest_spec = parse_dataset_spec(&pair[1])?;
        jobs.push(ReplicationJob {
            source_endpoint: Arc::new(endpoint_for(
                matches,
                Side::Source,
                &source_spec,
                programs,
                control_dir,
            )),
            source: source_spec.dataset,
            dest_endpoint: Arc::new(endpoint_for(
                matches,
                Side::Dest,
                &dest_spec,
                programs,
                control_dir,
            )),
            destination: dest_spec.dataset,
        });
    }
    Ok(jobs)
}

fn read_pair_file(path: &str) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|err| Error::Usage(format!("cannot read dataset pair file {path}: {err}")))?;
    let mut args = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((src, dst)) = line.split_once('\t') else {
            return Err(Error::Usage(format!(
                "pair file {path}: expected SRC<TAB>DST, got {line:?}"
            )));
        };
        args.push(src.trim().to_owned());
        args.push(dst.trim().to_owned());
    }
    Ok(args)
}

fn parse_programs(matches: &ArgMatches) -> Result<ProgramMap> {
    let mut programs = ProgramMap::default();
    let roles = [
        ("zfs-program", ProgramRole::Zfs),
        ("zpool-program", ProgramRole::Zpool),
        ("ssh-program", ProgramRole::Ssh),
        ("sudo-program", ProgramRole::Sudo),
        ("zstd-program", ProgramRole::Zstd),
        ("pv-program", ProgramRole::Pv),
        ("mbuffer-program", ProgramRole::Mbuffer),
    ];
    for (flag, role) in roles {
        if let Some(value) = matches.get_one::<String>(flag) {
            if value == "-" {
                if role == ProgramRole::Zfs {
                    return Err(Error::Usage("the zfs program cannot be disabled".to_owned()));
                }
                programs.set(role, None);
            } else {
                programs.set(role, Some(value.clone()));
            }
        }
    }
    Ok(programs)
}

fn parse_dataset_filter(matches: &ArgMatches) -> Result<DatasetFilter> {
    let mut include = compile_rules_vec(&expanded_list(matches, "include-dataset-regex")?)?;
    for literal in expanded_list(matches, "include-dataset")? {
        include.push(DatasetFilter::literal_rule(&literal).map_err(filter_usage)?);
    }

    let exclude_regexes = expanded_list(matches, "exclude-dataset-regex")?;
    let mut exclude = if exclude_regexes.is_empty() {
        vec![Rule::compile(DEFAULT_EXCLUDE_DATASET_REGEX).map_err(filter_usage)?]
    } else {
        compile_rules_vec(&exclude_regexes)?
    };
    for literal in expanded_list(matches, "exclude-dataset")? {
        exclude.push(DatasetFilter::literal_rule(&literal).map_err(filter_usage)?);
    }

    Ok(DatasetFilter::new(
        RuleList::from_rules(include),
        RuleList::from_rules(exclude),
    ))
}

/// Collects a repeatable list flag, expanding `@FILE` entries to one rule
/// per line.
fn expanded_list(matches: &ArgMatches, id: &str) -> Result<Vec<String>> {
    let values: Vec<String> = matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let mut expanded = Vec::with_capacity(values.len());
    for value in values {
        if let Some(path) = value.strip_prefix('@') {
            let content = fs::read_to_string(path).map_err(|err| {
                Error::Usage(format!("cannot read filter file {path}: {err}"))
            })?;
            expanded.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_owned),
            );
        } else {
            expanded.push(value);
        }
    }
    Ok(expanded)
}

fn compile_rules(texts: &[String]) -> Result<RuleList> {
    Ok(RuleList::from_rules(compile_rules_vec(texts)?))
}

fn compile_rules_vec(texts: &[String]) -> Result<Vec<Rule>> {
    texts
        .iter()
        .map(|text| Rule::compile(text).map_err(filter_usage))
        .collect()
}

fn filter_usage(err: zmirror_filters::FilterError) -> Error {
    Error::Usage(err.to_string())
}

/// Applies the envvar include/exclude rules to this process's environment,
/// which subprocesses inherit. The default excludes nothing.
fn apply_envvar_filter(matches: &ArgMatches) -> Result<()> {
    let include = compile_rules(&expanded_list(matches, "include-envvar-regex")?)?;
    let exclude = compile_rules(&expanded_list(matches, "exclude-envvar-regex")?)?;
    if include.is_empty() && exclude.is_empty() {
        return Ok(());
    }
    let filter = NameFilter::new(include, exclude);
    let doomed: Vec<String> = std::env::vars()
        .map(|(name, _)| name)
        .filter(|name| !filter.selects(name))
        .collect();
    for name in doomed {
        std::env::remove_var(name);
    }
    Ok(())
}

/// Directory for SSH control-master sockets, shared by all commands of the
/// run. `None` disables multiplexing when no home is available.
fn ssh_control_dir() -> Option<PathBuf> {
    let dir = std::env::var_os("HOME").map(PathBuf::from)?.join(".ssh").join("zmirror-mux");
    fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
