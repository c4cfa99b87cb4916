//! Validated ZFS dataset names.
//!
//! A dataset name is a slash-separated path whose first component is the pool
//! name, e.g. `tank1/backups/home`. The type rejects snapshot (`@`) and
//! bookmark (`#`) separators so that inventory code can append them without
//! double-checking, and offers the relative-path helpers the planner and the
//! filter engine work with.

use std::fmt;

use crate::error::{Error, Result};

/// A validated ZFS dataset (filesystem or volume) name.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Dataset {
    name: String,
}

impl Dataset {
    /// Parses and validates a dataset name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] when the name is empty, has empty path
    /// components, or contains a snapshot/bookmark separator.
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Usage("dataset name must not be empty".into()));
        }
        if name.contains('@') || name.contains('#') {
            return Err(Error::Usage(format!(
                "dataset name must not contain '@' or '#': {name}"
            )));
        }
        if name.starts_with('/') || name.ends_with('/') || name.split('/').any(str::is_empty) {
            return Err(Error::Usage(format!(
                "dataset name has empty path components: {name}"
            )));
        }
        Ok(Self { name: name.to_owned() })
    }

    /// Returns the full `pool/path` name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the pool, i.e. the first path component.
    #[must_use]
    pub fn pool(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    /// Returns true when `self` equals `other` or lies somewhere below it.
    #[must_use]
    pub fn is_self_or_descendant_of(&self, other: &Dataset) -> bool {
        self.name == other.name
            || (self.name.len() > other.name.len()
                && self.name.starts_with(other.name.as_str())
                && self.name.as_bytes()[other.name.len()] == b'/')
    }

    /// Returns the path of `self` relative to the ancestor `root`.
    ///
    /// The root itself maps to the empty string. Returns `None` when `self`
    /// is not below `root`.
    #[must_use]
    pub fn relative_to(&self, root: &Dataset) -> Option<&str> {
        if self.name == root.name {
            return Some("");
        }
        if self.is_self_or_descendant_of(root) {
            Some(&self.name[root.name.len() + 1..])
        } else {
            None
        }
    }

    /// Appends a relative path, yielding the corresponding descendant.
    #[must_use]
    pub fn join(&self, relative: &str) -> Dataset {
        if relative.is_empty() {
            return self.clone();
        }
        Dataset {
            name: format!("{}/{relative}", self.name),
        }
    }

    /// Returns the immediate parent dataset, or `None` for a pool root.
    #[must_use]
    pub fn parent(&self) -> Option<Dataset> {
        self.name.rfind('/').map(|idx| Dataset {
            name: self.name[..idx].to_owned(),
        })
    }

    /// Depth below the pool root; `tank` is 0, `tank/a/b` is 2.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.name.matches('/').count()
    }

    /// Formats the `dataset@snapshot` name for a snapshot of this dataset.
    #[must_use]
    pub fn snapshot_name(&self, snapshot: &str) -> String {
        format!("{}@{snapshot}", self.name)
    }

    /// Formats the `dataset#bookmark` name for a bookmark of this dataset.
    #[must_use]
    pub fn bookmark_name(&self, bookmark: &str) -> String {
        format!("{}#{bookmark}", self.name)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_pool_roots_and_nested_paths() {
        assert_eq!(Dataset::parse("tank").expect("pool root").pool(), "tank");
        let nested = Dataset::parse("tank/a/b").expect("nested");
        assert_eq!(nested.pool(), "tank");
        assert_eq!(nested.depth(), 2);
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for bad in ["", "/tank", "tank/", "tank//a", "tank@snap", "tank#book"] {
            assert!(Dataset::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn relative_to_distinguishes_descendants() {
        let root = Dataset::parse("tank/src").expect("root");
        let child = Dataset::parse("tank/src/a/b").expect("child");
        let stranger = Dataset::parse("tank/srcx").expect("stranger");

        assert_eq!(root.relative_to(&root), Some(""));
        assert_eq!(child.relative_to(&root), Some("a/b"));
        assert_eq!(stranger.relative_to(&root), None);
    }

    #[test]
    fn join_round_trips_relative_paths() {
        let root = Dataset::parse("tank2/dst").expect("root");
        assert_eq!(root.join("").name(), "tank2/dst");
        assert_eq!(root.join("a/b").name(), "tank2/dst/a/b");
    }

    #[test]
    fn parent_walks_up_one_component() {
        let ds = Dataset::parse("tank/a/b").expect("dataset");
        assert_eq!(ds.parent().expect("parent").name(), "tank/a");
        assert!(Dataset::parse("tank").expect("pool").parent().is_none());
    }

    #[test]
    fn snapshot_and_bookmark_names_use_zfs_separators() {
        let ds = Dataset::parse("tank/a").expect("dataset");
        assert_eq!(ds.snapshot_name("s1"), "tank/a@s1");
        assert_eq!(ds.bookmark_name("s1"), "tank/a#s1");
    }
}
