//! Dataset selection: literal translation and tree-aware evaluation.

use crate::rule::{FilterError, MatchScope, Rule, RuleList};

/// Translates a literal dataset name from the user-friendly include/exclude
/// flags into anchored rule text covering the dataset and its descendants.
///
/// Regex metacharacters in the literal are escaped. The returned text is
/// meant for [`Rule::compile_scoped`]; callers pick [`MatchScope::Absolute`]
/// when the literal had a leading `/`.
#[must_use]
pub fn literal_to_rule_text(literal: &str) -> String {
    let trimmed = literal.strip_prefix('/').unwrap_or(literal);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    format!("{}(?:/.*)?", regex::escape(trimmed))
}

/// Compiled dataset selection policy.
///
/// Regex rules and relative literals are matched against the path relative
/// to the root dataset (empty string for the root itself); absolute literals
/// against the full `pool/path` name.
#[derive(Clone, Debug, Default)]
pub struct DatasetFilter {
    include: RuleList,
    exclude: RuleList,
}

impl DatasetFilter {
    /// Builds a filter from compiled rule lists.
    #[must_use]
    pub fn new(include: RuleList, exclude: RuleList) -> Self {
        Self { include, exclude }
    }

    /// Compiles regex rule texts straight into a filter.
    ///
    /// # Errors
    ///
    /// Returns the first [`FilterError`] encountered.
    pub fn compile<I, J, S>(include: I, exclude: J) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            include: RuleList::compile(include)?,
            exclude: RuleList::compile(exclude)?,
        })
    }

    /// Compiles a literal dataset name into a rule for this filter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] when the escaped literal fails to compile,
    /// which only happens for pathological inputs.
    pub fn literal_rule(literal: &str) -> Result<Rule, FilterError> {
        let scope = if literal.starts_with('/') {
            MatchScope::Absolute
        } else {
            MatchScope::Relative
        };
        Rule::compile_scoped(&literal_to_rule_text(literal), scope)
    }

    /// Whether the dataset at `relative` (under the root named `absolute`
    /// minus `relative`) is selected.
    ///
    /// The planner only consults this for datasets whose ancestors were all
    /// selected, which is what makes exclusion sticky.
    #[must_use]
    pub fn selects(&self, relative: &str, absolute: &str) -> bool {
        (self.include.is_empty() || self.include.matches_scoped(relative, absolute))
            && !self.exclude.matches_scoped(relative, absolute)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_covers_dataset_and_descendants() {
        let rule = Rule::compile(&literal_to_rule_text("foo/bar")).expect("compiles");
        assert!(rule.matches("foo/bar"));
        assert!(rule.matches("foo/bar/baz"));
        assert!(!rule.matches("foo/barbara"));
        assert!(!rule.matches("foo"));
    }

    #[test]
    fn literal_escapes_regex_metacharacters() {
        let rule = Rule::compile(&literal_to_rule_text("a.b")).expect("compiles");
        assert!(rule.matches("a.b"));
        assert!(!rule.matches("axb"));
    }

    #[test]
    fn absolute_literals_match_the_full_name() {
        let filter = DatasetFilter::new(
            RuleList::from_rules(vec![
                DatasetFilter::literal_rule("/tank1/src/keep").expect("rule"),
            ]),
            RuleList::default(),
        );
        assert!(filter.selects("keep", "tank1/src/keep"));
        assert!(filter.selects("keep/sub", "tank1/src/keep/sub"));
        assert!(!filter.selects("drop", "tank1/src/drop"));
    }

    #[test]
    fn exclude_regex_hides_matching_subtrees() {
        let filter = DatasetFilter::compile::<_, _, &str>([], ["tmp.*", ".*/tmp.*"])
            .expect("filter compiles");
        assert!(filter.selects("", "tank1/src"));
        assert!(filter.selects("foo", "tank1/src/foo"));
        assert!(!filter.selects("foo/tmp", "tank1/src/foo/tmp"));
        assert!(!filter.selects("tmpdata", "tank1/src/tmpdata"));
    }
}
