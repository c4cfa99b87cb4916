#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `zmirror_filters` compiles the include/exclude rule lists that decide
//! which datasets are walked, which snapshots are replicated or pruned,
//! which properties are carried to the destination, and which environment
//! variables subprocesses inherit.
//!
//! # Design
//!
//! - [`Rule`] is one compiled `(regex, negated)` pair. A leading `!` in the
//!   rule text negates the match.
//! - [`RuleList`] is an ordered vector of rules; a name matches the list
//!   when at least one rule matches it (negation applied per rule).
//! - [`NameFilter`] pairs an include list with an exclude list. Exclude
//!   beats include. An empty include list selects everything.
//! - [`DatasetFilter`] adds the dataset-specific twist: regex rules and
//!   relative literals are evaluated against the path relative to the root
//!   dataset, while literals with a leading `/` are evaluated against the
//!   absolute dataset name. Literal names (from the user-friendly flags)
//!   are translated into anchored regexes that also cover descendants.
//!
//! Exclusion stickiness down the dataset tree is not implemented here: the
//! planner simply stops descending into an excluded dataset, which makes
//! stickiness structural rather than re-evaluated.
//!
//! # Errors
//!
//! [`FilterError`] reports the offending pattern together with the
//! underlying [`regex::Error`] when a rule fails to compile.
//!
//! # Examples
//!
//! ```
//! use zmirror_filters::{NameFilter, RuleList};
//!
//! let include = RuleList::compile(["daily.*", "weekly.*"]).expect("include compiles");
//! let exclude = RuleList::compile([".*_tmp"]).expect("exclude compiles");
//! let filter = NameFilter::new(include, exclude);
//!
//! assert!(filter.selects("daily_2024"));
//! assert!(!filter.selects("hourly_2024"));   // not included
//! assert!(!filter.selects("daily_x_tmp"));   // excluded
//!
//! // `!` negates a rule: this include list selects everything but hourly_*.
//! let inverted = NameFilter::new(
//!     RuleList::compile(["!hourly.*"]).expect("include compiles"),
//!     RuleList::default(),
//! );
//! assert!(inverted.selects("daily_2024"));
//! assert!(!inverted.selects("hourly_2024"));
//! ```

mod dataset;
mod rule;

pub use dataset::{DatasetFilter, literal_to_rule_text};
pub use rule::{FilterError, MatchScope, NameFilter, Rule, RuleList};
