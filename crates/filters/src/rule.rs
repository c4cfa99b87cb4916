//! Rule compilation and list evaluation.

use regex::Regex;
use thiserror::Error;

/// Error raised when a rule fails to compile.
#[derive(Debug, Error)]
#[error("invalid filter pattern {pattern:?}: {source}")]
pub struct FilterError {
    /// The rule text as supplied by the user.
    pub pattern: String,
    /// The underlying regex compilation failure.
    #[source]
    pub source: regex::Error,
}

/// Which spelling of a dataset name a rule is evaluated against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchScope {
    /// The path relative to the root dataset (the default).
    Relative,
    /// The absolute `pool/path` name (literals with a leading `/`).
    Absolute,
}

/// One compiled filter rule.
#[derive(Clone, Debug)]
pub struct Rule {
    regex: Regex,
    negated: bool,
    scope: MatchScope,
}

impl Rule {
    /// Compiles a rule from its text form.
    ///
    /// A leading `!` negates the rule. The remaining text is compiled as an
    /// anchored regex: ZFS names never span lines, so rules match the whole
    /// name unless the pattern itself is explicitly unanchored via `.*`.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] when the regex fails to compile.
    pub fn compile(text: &str) -> Result<Self, FilterError> {
        Self::compile_scoped(text, MatchScope::Relative)
    }

    /// Compiles a rule evaluated against a specific name spelling.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] when the regex fails to compile.
    pub fn compile_scoped(text: &str, scope: MatchScope) -> Result<Self, FilterError> {
        let (negated, pattern) = match text.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let anchored = format!("^(?:{pattern})$");
        let regex = Regex::new(&anchored).map_err(|source| FilterError {
            pattern: text.to_owned(),
            source,
        })?;
        Ok(Self {
            regex,
            negated,
            scope,
        })
    }

    /// Evaluates the rule against a name, applying negation.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name) != self.negated
    }

    /// The spelling this rule is evaluated against.
    #[must_use]
    pub const fn scope(&self) -> MatchScope {
        self.scope
    }
}

/// An ordered list of rules.
///
/// A name matches the list when at least one rule matches it. The empty
/// list matches nothing.
#[derive(Clone, Debug, Default)]
pub struct RuleList {
    rules: Vec<Rule>,
}

impl RuleList {
    /// Compiles each text rule in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`FilterError`] encountered.
    pub fn compile<I, S>(texts: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = texts
            .into_iter()
            .map(|text| Rule::compile(text.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Builds a list from already-compiled rules.
    #[must_use]
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// True when the list holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True when at least one rule matches `name`.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(name))
    }

    /// Scoped evaluation for dataset rules: each rule picks the relative or
    /// absolute spelling according to its [`MatchScope`].
    #[must_use]
    pub fn matches_scoped(&self, relative: &str, absolute: &str) -> bool {
        self.rules.iter().any(|rule| match rule.scope() {
            MatchScope::Relative => rule.matches(relative),
            MatchScope::Absolute => rule.matches(absolute),
        })
    }
}

/// An include list and an exclude list over plain names.
///
/// Used for snapshot names, property names and environment variable names.
#[derive(Clone, Debug, Default)]
pub struct NameFilter {
    include: RuleList,
    exclude: RuleList,
}

impl NameFilter {
    /// Builds a filter from compiled lists.
    #[must_use]
    pub fn new(include: RuleList, exclude: RuleList) -> Self {
        Self { include, exclude }
    }

    /// A filter that selects every name.
    #[must_use]
    pub fn select_all() -> Self {
        Self::default()
    }

    /// Whether `name` is selected: included (or include list empty) and not
    /// excluded.
    #[must_use]
    pub fn selects(&self, name: &str) -> bool {
        (self.include.is_empty() || self.include.matches(name)) && !self.exclude.matches(name)
    }
}
