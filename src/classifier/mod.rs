//! URL classification and normalisation
//!
//! A [`UrlClass`] is a declarative rule that both recognises URLs by
//! domain/path/query shape and parameterises how a matching URL is rewritten
//! to its canonical form. [`classify`] scans a rule set and returns the
//! highest-priority rule that applies together with the normalised URL.
//!
//! Normalisation is deterministic up to query-parameter ordering (keys are
//! encoded in stable sorted order) and idempotent: re-classifying a
//! normalised URL yields the same rule and the same URL.

mod matcher;

pub use matcher::{MatcherKind, ParamMatcher, StringMatcher};

use crate::{ClassifyError, ClassifyResult};
use serde::{Deserialize, Serialize};
use url::Url;

/// The category of URL a class recognises
///
/// The category decides which parser output types may run against a fetched
/// document and whether the fetch loop recurses at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlKind {
    /// Directly addressable content (an image, a file)
    #[default]
    File,
    /// A page presenting a single content item plus its metadata
    Post,
    /// A listing of posts, possibly paginated
    List,
    /// A page to monitor for changes
    Watch,
    /// Recognised but deliberately not processed
    Ignore,
}

/// A declarative URL classification and normalisation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlClass {
    pub name: String,

    #[serde(default)]
    pub kind: UrlKind,

    /// Higher priority wins when several rules match; ties go to the rule
    /// encountered first.
    #[serde(default)]
    pub priority: i32,

    pub domain: String,

    /// Ordered matchers applied to path segments
    #[serde(default)]
    pub path: Vec<StringMatcher>,

    /// Matchers applied to query parameters by key
    #[serde(default)]
    pub query: Vec<ParamMatcher>,

    /// Keep an http scheme instead of forcing https
    #[serde(default)]
    pub allow_http: bool,

    /// Permit hosts that end in `.domain`
    #[serde(default)]
    pub match_subdomain: bool,

    /// Preserve a matched subdomain instead of rewriting the host to `domain`
    #[serde(default)]
    pub allow_subdomain: bool,
}

impl UrlClass {
    /// Applies this rule to a URL, returning the normalised form.
    ///
    /// Performs, in order: scheme forcing, host check and rewrite, path
    /// matching with default substitution, and query matching with
    /// canonical stable-order encoding. A failure at any step yields a
    /// [`ClassifyError`] naming the step and the mismatched value.
    pub fn apply(&self, url: &Url) -> ClassifyResult<Url> {
        let mut out = url.clone();

        if out.scheme() != "https" && !self.allow_http {
            let _ = out.set_scheme("https");
        }

        self.apply_host(&mut out)?;
        self.apply_path(&mut out)?;
        self.apply_query(&mut out)?;

        Ok(out)
    }

    fn apply_host(&self, url: &mut Url) -> ClassifyResult<()> {
        let host = url.host_str().unwrap_or("").to_string();
        if host != self.domain {
            let is_subdomain = host.ends_with(&format!(".{}", self.domain));
            if !self.match_subdomain || !is_subdomain {
                return Err(ClassifyError::DomainMismatch {
                    host,
                    domain: self.domain.clone(),
                });
            }
        }
        if !self.allow_subdomain && host != self.domain {
            url.set_host(Some(&self.domain))
                .map_err(|_| ClassifyError::DomainMismatch {
                    host,
                    domain: self.domain.clone(),
                })?;
        }
        Ok(())
    }

    fn apply_path(&self, url: &mut Url) -> ClassifyResult<()> {
        let mut segments: Vec<&str> = url.path().split('/').skip(1).collect();
        // A lone trailing empty segment is the residue of a previously
        // substituted empty default; dropping it keeps normalisation
        // idempotent under re-classification.
        if segments.len() > 1 && segments.last() == Some(&"") {
            segments.pop();
        }

        let mut emitted: Vec<String> = Vec::with_capacity(self.path.len());
        for (index, matcher) in self.path.iter().enumerate() {
            if index < segments.len() {
                let segment = segments[index];
                if !matcher.matches(segment) {
                    return Err(ClassifyError::PathSegment {
                        index,
                        segment: segment.to_string(),
                    });
                }
                emitted.push(segment.to_string());
            } else if let Some(default) = &matcher.default {
                emitted.push(default.clone());
            } else {
                return Err(ClassifyError::PathLength { index });
            }
        }

        url.set_path(&format!("/{}", emitted.join("/")));
        Ok(())
    }

    fn apply_query(&self, url: &mut Url) -> ClassifyResult<()> {
        let existing: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        // Declared parameters keep their matching values or fall back to a
        // non-empty default; everything undeclared is dropped.
        let mut kept: Vec<(String, String)> = Vec::new();
        for param in &self.query {
            let values: Vec<&String> = existing
                .iter()
                .filter(|(k, _)| *k == param.key)
                .map(|(_, v)| v)
                .collect();
            if values.is_empty() {
                match &param.matcher.default {
                    Some(default) if !default.is_empty() => {
                        kept.push((param.key.clone(), default.clone()));
                    }
                    _ => {
                        return Err(ClassifyError::MissingDefault {
                            key: param.key.clone(),
                        })
                    }
                }
                continue;
            }
            for value in values {
                if !param.matcher.matches(value) {
                    return Err(ClassifyError::QueryParam {
                        key: param.key.clone(),
                        value: value.clone(),
                    });
                }
                kept.push((param.key.clone(), value.clone()));
            }
        }

        if kept.is_empty() {
            url.set_query(None);
            return Ok(());
        }

        kept.sort();
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &kept {
            serializer.append_pair(k, v);
        }
        url.set_query(Some(&serializer.finish()));
        Ok(())
    }
}

/// Picks the rule for a URL and returns it with the normalised URL.
///
/// The rule with the strictly greatest priority whose [`UrlClass::apply`]
/// succeeds wins; ties resolve in favour of the rule encountered first.
/// Rules that fail to apply are skipped silently.
pub fn classify<'a>(url: &Url, rules: &'a [UrlClass]) -> ClassifyResult<(&'a UrlClass, Url)> {
    let mut keep: Option<(&UrlClass, Url)> = None;
    for rule in rules {
        if let Some((kept, _)) = &keep {
            if kept.priority >= rule.priority {
                continue;
            }
        }
        match rule.apply(url) {
            Ok(normalised) => keep = Some((rule, normalised)),
            Err(err) => tracing::trace!("rule {:?} skipped for {}: {}", rule.name, url, err),
        }
    }
    keep.ok_or_else(|| ClassifyError::NoClassifier {
        url: url.to_string(),
    })
}
