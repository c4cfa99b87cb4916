//! Test fixture: a scripted `zfs`/`zpool` stand-in backed by plain text
//! state files, wired into the engine through the program-path overrides.
//!
//! The stub understands exactly the invocations the engine issues (list,
//! send, receive, rollback, destroy, bookmark, create) and mutates its
//! state files the way real ZFS would, so the tests exercise the engine
//! end to end without touching a real pool.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use zmirror_engine::{EngineConfig, ReplicationJob};
use zmirror_transport::{Endpoint, ProgramRole, SudoPolicy};

const ZFS_STUB: &str = r##"#!/bin/sh
# Minimal scripted zfs backed by plain text state files.
state="__STATE__"
printf 'zfs %s\n' "$*" >> "$state/log"

snaps="$state/snapshots"
books="$state/bookmarks"
dsets="$state/datasets"
props="$state/properties"
tab="$(printf '\t')"

txg_of() {
    awk -F"$tab" -v ds="$1" -v n="$2" '$1==ds && $2==n {print $4; exit}' "$3"
}

has_dataset() {
    awk -v ds="$1" '$0==ds {found=1} END {exit !found}' "$dsets"
}

cmd="$1"
[ $# -gt 0 ] && shift

case "$cmd" in
--version)
    echo "zfs-2.2.4-1"
    ;;
list)
    tflag=""; rest=""
    while [ $# -gt 0 ]; do
        case "$1" in
        -t) tflag="$2"; shift 2 ;;
        -o|-s|-d) shift 2 ;;
        -*) shift ;;
        *) rest="$1"; shift ;;
        esac
    done
    ds="$rest"
    case "$tflag" in
    snapshot)
        awk -F"$tab" -v ds="$ds" '$1==ds {print $1"@"$2"\t"$3"\t"$4}' "$snaps"
        ;;
    bookmark)
        awk -F"$tab" -v ds="$ds" '$1==ds {print $1"#"$2"\t"$3"\t"$4}' "$books"
        ;;
    filesystem,volume)
        awk -v ds="$ds" '$0==ds || index($0, ds"/")==1' "$dsets" | sort
        ;;
    *)
        if has_dataset "$ds"; then
            echo "$ds"
        else
            echo "cannot open '$ds': dataset does not exist" >&2
            exit 1
        fi
        ;;
    esac
    ;;
send)
    mode="full"; base=""; target=""
    while [ $# -gt 0 ]; do
        case "$1" in
        -i) mode="single"; base="$2"; shift 2 ;;
        -I) mode="range"; base="$2"; shift 2 ;;
        -*) shift ;;
        *) target="$1"; shift ;;
        esac
    done
    ds="${target%@*}"
    snap="${target#*@}"
    if [ "$mode" = "range" ]; then
        bname="${base#?}"
        case "$base" in
        '#'*) btxg="$(txg_of "$ds" "$bname" "$books")" ;;
        *) btxg="$(txg_of "$ds" "$bname" "$snaps")" ;;
        esac
        ttxg="$(txg_of "$ds" "$snap" "$snaps")"
        awk -F"$tab" -v ds="$ds" -v lo="$btxg" -v hi="$ttxg" \
            '$1==ds && $4+0>lo+0 && $4+0<=hi+0 {print "SNAP\t"$2"\t"$3"\t"$4}' "$snaps"
    else
        awk -F"$tab" -v ds="$ds" -v n="$snap" \
            '$1==ds && $2==n {print "SNAP\t"$2"\t"$3"\t"$4}' "$snaps"
    fi
    ;;
receive)
    dry=""; ds=""
    while [ $# -gt 0 ]; do
        case "$1" in
        -n) dry=1; shift ;;
        -*) shift ;;
        *) ds="$1"; shift ;;
        esac
    done
    if [ -n "$dry" ]; then
        cat > /dev/null
        exit 0
    fi
    has_dataset "$ds" || echo "$ds" >> "$dsets"
    while IFS= read -r line; do
        case "$line" in
        SNAP*) printf '%s%s\n' "$ds$tab" "${line#SNAP$tab}" >> "$snaps" ;;
        esac
    done
    ;;
rollback)
    target=""
    while [ $# -gt 0 ]; do
        case "$1" in -*) shift ;; *) target="$1"; shift ;; esac
    done
    ds="${target%@*}"; snap="${target#*@}"
    txg="$(txg_of "$ds" "$snap" "$snaps")"
    awk -F"$tab" -v ds="$ds" -v txg="$txg" '!($1==ds && $4+0>txg+0)' "$snaps" > "$snaps.tmp"
    mv "$snaps.tmp" "$snaps"
    ;;
destroy)
    target=""
    while [ $# -gt 0 ]; do
        case "$1" in -*) shift ;; *) target="$1"; shift ;; esac
    done
    case "$target" in
    *@*)
        ds="${target%@*}"
        names="${target#*@}"
        IFS=','
        for n in $names; do
            awk -F"$tab" -v ds="$ds" -v n="$n" '!($1==ds && $2==n)' "$snaps" > "$snaps.tmp"
            mv "$snaps.tmp" "$snaps"
        done
        unset IFS
        ;;
    *)
        awk -v ds="$target" '!($0==ds || index($0, ds"/")==1)' "$dsets" > "$dsets.tmp"
        mv "$dsets.tmp" "$dsets"
        awk -F"$tab" -v ds="$target" '!($1==ds || index($1, ds"/")==1)' "$snaps" > "$snaps.tmp"
        mv "$snaps.tmp" "$snaps"
        ;;
    esac
    ;;
bookmark)
    src="$1"; mark="$2"
    ds="${src%@*}"; snap="${src#*@}"
    guid="$(awk -F"$tab" -v ds="$ds" -v n="$snap" '$1==ds && $2==n {print $3; exit}' "$snaps")"
    txg="$(txg_of "$ds" "$snap" "$snaps")"
    printf '%s\t%s\t%s\t%s\n' "$ds" "${mark#*#}" "$guid" "$txg" >> "$books"
    ;;
get)
    prop=""; root=""
    while [ $# -gt 0 ]; do
        case "$1" in
        -o) shift 2 ;;
        -*) shift ;;
        *)
            if [ -z "$prop" ]; then prop="$1"; else root="$1"; fi
            shift
            ;;
        esac
    done
    awk -v ds="$root" '$0==ds || index($0, ds"/")==1' "$dsets" | while IFS= read -r d; do
        v="$(awk -F"$tab" -v ds="$d" -v p="$prop" '$1==ds && $2==p {print $3; exit}' "$props")"
        [ -n "$v" ] || v="-"
        printf '%s\t%s\n' "$d" "$v"
    done
    ;;
create)
    ds=""
    while [ $# -gt 0 ]; do
        case "$1" in -*) shift ;; *) ds="$1"; shift ;; esac
    done
    d="$ds"
    while [ -n "$d" ]; do
        has_dataset "$d" || echo "$d" >> "$dsets"
        case "$d" in
        */*) d="${d%/*}" ;;
        *) d="" ;;
        esac
    done
    ;;
*)
    echo "fake zfs: unsupported command: $cmd $*" >&2
    exit 1
    ;;
esac
"##;

const ZPOOL_STUB: &str = r##"#!/bin/sh
printf 'zpool %s\n' "$*" >> "__STATE__/log"
echo "enabled"
"##;

/// One scripted ZFS world (both "pools" share it, like one host).
pub struct FakeZfs {
    root: TempDir,
}

impl FakeZfs {
    pub fn new() -> Self {
        let root = TempDir::new().expect("create fixture tempdir");
        let state = root.path().join("state");
        let bin = root.path().join("bin");
        fs::create_dir_all(&state).expect("create state dir");
        fs::create_dir_all(&bin).expect("create bin dir");
        for file in ["datasets", "snapshots", "bookmarks", "properties", "log"] {
            fs::write(state.join(file), "").expect("seed state file");
        }
        let state_str = state.display().to_string();
        for (name, template) in [("zfs", ZFS_STUB), ("zpool", ZPOOL_STUB)] {
            let path = bin.join(name);
            fs::write(&path, template.replace("__STATE__", &state_str))
                .expect("write stub");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                .expect("chmod stub");
        }
        Self { root }
    }

    fn state(&self) -> PathBuf {
        self.root.path().join("state")
    }

    pub fn add_dataset(&self, name: &str) {
        append(&self.state().join("datasets"), &format!("{name}\n"));
    }

    pub fn add_snapshot(&self, dataset: &str, name: &str, guid: u64, txg: u64) {
        append(
            &self.state().join("snapshots"),
            &format!("{dataset}\t{name}\t{guid}\t{txg}\n"),
        );
    }

    pub fn set_property(&self, dataset: &str, property: &str, value: &str) {
        append(
            &self.state().join("properties"),
            &format!("{dataset}\t{property}\t{value}\n"),
        );
    }

    /// Drops one snapshot from the state, as an external pruner would.
    pub fn remove_snapshot(&self, dataset: &str, name: &str) {
        let path = self.state().join("snapshots");
        let prefix = format!("{dataset}\t{name}\t");
        let kept: String = fs::read_to_string(&path)
            .expect("read snapshots")
            .lines()
            .filter(|line| !line.starts_with(&prefix))
            .map(|line| format!("{line}\n"))
            .collect();
        fs::write(path, kept).expect("write snapshots");
    }

    pub fn datasets(&self) -> Vec<String> {
        read_lines(&self.state().join("datasets"))
    }

    pub fn snapshots_of(&self, dataset: &str) -> Vec<(String, u64, u64)> {
        entries_of(&self.state().join("snapshots"), dataset)
    }

    pub fn bookmarks_of(&self, dataset: &str) -> Vec<(String, u64, u64)> {
        entries_of(&self.state().join("bookmarks"), dataset)
    }

    pub fn log(&self) -> String {
        fs::read_to_string(self.state().join("log")).expect("read log")
    }

    /// A local endpoint whose `zfs`/`zpool` are the stubs and whose
    /// auxiliary roles are disabled, keeping transfer pipelines two-stage.
    pub fn endpoint(&self) -> Endpoint {
        let mut endpoint = Endpoint::local();
        endpoint.sudo = SudoPolicy::Never;
        endpoint.programs.set(
            ProgramRole::Zfs,
            Some(self.root.path().join("bin/zfs").display().to_string()),
        );
        endpoint.programs.set(
            ProgramRole::Zpool,
            Some(self.root.path().join("bin/zpool").display().to_string()),
        );
        for role in [ProgramRole::Zstd, ProgramRole::Pv, ProgramRole::Mbuffer] {
            endpoint.programs.set(role, None);
        }
        endpoint
    }

    /// An engine configuration replicating `source` to `destination` in
    /// this fake world.
    pub fn config(&self, source: &str, destination: &str) -> EngineConfig {
        let endpoint = Arc::new(self.endpoint());
        let job = ReplicationJob {
            source_endpoint: Arc::clone(&endpoint),
            source: zmirror_core::Dataset::parse(source).expect("source dataset"),
            dest_endpoint: Arc::clone(&endpoint),
            destination: zmirror_core::Dataset::parse(destination)
                .expect("destination dataset"),
        };
        let mut config = EngineConfig::new(vec![job]);
        config.local_endpoint = endpoint;
        config
    }
}

fn append(path: &std::path::Path, text: &str) {
    let mut current = fs::read_to_string(path).expect("read state file");
    current.push_str(text);
    fs::write(path, current).expect("write state file");
}

fn read_lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read state file")
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

fn entries_of(path: &std::path::Path, dataset: &str) -> Vec<(String, u64, u64)> {
    read_lines(path)
        .iter()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let ds = fields.next()?;
            if ds != dataset {
                return None;
            }
            let name = fields.next()?.to_owned();
            let guid = fields.next()?.parse().ok()?;
            let txg = fields.next()?.parse().ok()?;
            Some((name, guid, txg))
        })
        .collect()
}
