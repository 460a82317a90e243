//! String and query-parameter matchers
//!
//! The building blocks of [`UrlClass`](super::UrlClass) rules. A matcher
//! either compares exactly or applies a regular expression; a small alias
//! table maps common patterns to their expansions.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a [`StringMatcher`] compares candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    #[default]
    Exact,
    Regex,
}

/// Matches a single string, optionally carrying a default value
///
/// Invariants: an empty candidate never matches; a matcher with an empty
/// value matches any non-empty candidate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StringMatcher {
    #[serde(default)]
    pub kind: MatcherKind,

    #[serde(default)]
    pub value: String,

    /// Substituted when the matched position is absent from the URL.
    /// `Some("")` is a real default (an empty emitted segment), distinct
    /// from having none at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Regex aliases recognised verbatim in matcher values
const ALIASES: &[(&str, &str)] = &[
    ("any", "[^/]+"),
    ("alpha", "[A-Za-z]"),
    ("alphas", "[A-Za-z]+"),
    ("digit", "[0-9]"),
    ("digits", "[0-9]+"),
    ("alnum", "[A-Za-z0-9]"),
    ("alnums", "[A-Za-z0-9]+"),
];

impl StringMatcher {
    /// Shorthand for an exact matcher without a default.
    pub fn exact(value: impl Into<String>) -> Self {
        StringMatcher {
            kind: MatcherKind::Exact,
            value: value.into(),
            default: None,
        }
    }

    /// Shorthand for a regex matcher without a default.
    pub fn regex(value: impl Into<String>) -> Self {
        StringMatcher {
            kind: MatcherKind::Regex,
            value: value.into(),
            default: None,
        }
    }

    /// Attaches a default value.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Reports whether the candidate satisfies this matcher.
    pub fn matches(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        if self.value.is_empty() {
            return true;
        }
        match self.kind {
            MatcherKind::Exact => self.value == candidate,
            MatcherKind::Regex => {
                let pattern = ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == self.value)
                    .map(|(_, expansion)| *expansion)
                    .unwrap_or(self.value.as_str());
                match Regex::new(pattern) {
                    Ok(re) => re.is_match(candidate),
                    Err(err) => {
                        tracing::error!("invalid matcher pattern {:?}: {}", pattern, err);
                        false
                    }
                }
            }
        }
    }
}

/// A [`StringMatcher`] bound to a query-parameter key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamMatcher {
    pub key: String,

    #[serde(flatten)]
    pub matcher: StringMatcher,
}

impl ParamMatcher {
    pub fn new(key: impl Into<String>, matcher: StringMatcher) -> Self {
        ParamMatcher {
            key: key.into(),
            matcher,
        }
    }
}
