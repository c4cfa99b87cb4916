//! Log directory layout: timestamped files and `current.*` symlinks.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::macros::format_description;

/// Where this run's log artifacts live.
///
/// The directory receives one `zmirror-<timestamp>.log` per run plus a
/// `current.log` symlink rotated to the newest file, and a parallel
/// `current.pv` symlink for the transfer-progress log.
#[derive(Clone, Debug)]
pub struct LogLayout {
    dir: PathBuf,
    log_file: PathBuf,
    pv_file: PathBuf,
}

impl LogLayout {
    /// Computes the layout for a run starting now.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        let stamp = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year]-[month]-[day]_[hour]-[minute]-[second]"
            ))
            .unwrap_or_else(|_| "unknown".to_owned());
        let log_file = dir.join(format!("zmirror-{stamp}.log"));
        let pv_file = dir.join(format!("zmirror-{stamp}.pv"));
        Self {
            dir,
            log_file,
            pv_file,
        }
    }

    /// The default directory under the user's home.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        std::env::var_os("HOME")
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
            .join(".zmirror")
            .join("log")
    }

    /// The run's log file path.
    #[must_use]
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// The run's `pv` log file path.
    #[must_use]
    pub fn pv_file(&self) -> &Path {
        &self.pv_file
    }

    /// Creates the directory and log file and rotates both symlinks.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; symlink rotation failures are
    /// fatal only when the platform supports symlinks at all.
    pub fn create(&self) -> io::Result<File> {
        fs::create_dir_all(&self.dir)?;
        let file = File::create(&self.log_file)?;
        rotate_symlink(&self.log_file, &self.dir.join("current.log"))?;
        rotate_symlink(&self.pv_file, &self.dir.join("current.pv"))?;
        Ok(file)
    }
}

#[cfg(unix)]
fn rotate_symlink(target: &Path, link: &Path) -> io::Result<()> {
    match fs::symlink_metadata(link) {
        Ok(_) => fs::remove_file(link)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn rotate_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Ok(())
}
