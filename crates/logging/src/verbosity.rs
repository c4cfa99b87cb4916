//! Verbosity levels derived from `-v`/`-q` flags.

use tracing_subscriber::filter::LevelFilter;

/// Terminal verbosity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub enum Verbosity {
    /// `-q`: errors only.
    Quiet,
    /// Default: progress and results.
    #[default]
    Info,
    /// `-v`: per-command detail, stage-tagged subprocess stderr.
    Debug,
    /// `-vv` and beyond: full exec traces.
    Trace,
}

impl Verbosity {
    /// Derives the level from the counted `-v` flags and the `-q` flag.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Info,
            1 => Self::Debug,
            _ => Self::Trace,
        }
    }

    /// The corresponding `tracing` level filter.
    #[must_use]
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(Verbosity::from_flags(3, true), Verbosity::Quiet);
    }

    #[test]
    fn verbose_count_escalates() {
        assert_eq!(Verbosity::from_flags(0, false), Verbosity::Info);
        assert_eq!(Verbosity::from_flags(1, false), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(4, false), Verbosity::Trace);
    }
}
