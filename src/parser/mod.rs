//! Declarative parsing of fetched documents
//!
//! A [`Parser`] is a named pipeline of operations applied to a set of
//! strings (initially the document body). Each operation maps the current
//! set to a new one; an empty set at any stage short-circuits the parser to
//! no result. The parser's output type says what the final values mean to
//! the fetch loop: content to retrieve, tags to attach, links to follow.

mod xpath;

pub use xpath::XpathExpr;

use crate::classifier::{UrlClass, UrlKind};
use crate::ParseError;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use url::Url;

/// What a parser's final values represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Content,
    Tag,
    Follow,
    Next,
    Title,
    Source,
    Md5sum,
}

impl UrlKind {
    /// Parser output types permitted for documents of this class kind.
    pub fn permitted_outputs(&self) -> &'static [OutputType] {
        match self {
            UrlKind::File => &[OutputType::Content],
            UrlKind::Post => &[OutputType::Content, OutputType::Tag, OutputType::Follow],
            UrlKind::List => &[OutputType::Follow, OutputType::Next],
            UrlKind::Watch | UrlKind::Ignore => &[],
        }
    }
}

/// A single pipeline operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Emit the literal value, ignoring input
    Value,
    /// Evaluate an XPath expression against each input parsed as HTML
    Xpath,
    /// Emit every non-overlapping regex match in each input
    Regex,
    /// Prepend the value to each input
    Prefix,
    /// Append the value to each input
    Suffix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub value: String,
}

impl Operation {
    pub fn new(kind: OpKind, value: impl Into<String>) -> Self {
        Operation {
            kind,
            value: value.into(),
        }
    }

    fn run(&self, input: &[String]) -> Result<Vec<String>, ParseError> {
        match self.kind {
            OpKind::Value => Ok(vec![self.value.clone()]),
            OpKind::Xpath => {
                let expr = XpathExpr::compile(&self.value)?;
                let mut out = Vec::new();
                for text in input {
                    let html = Html::parse_document(text);
                    out.extend(expr.eval(&html));
                }
                Ok(out)
            }
            OpKind::Regex => {
                let re = Regex::new(&self.value).map_err(|err| ParseError::Regex {
                    pattern: self.value.clone(),
                    message: err.to_string(),
                })?;
                let mut out = Vec::new();
                for text in input {
                    out.extend(re.find_iter(text).map(|m| m.as_str().to_string()));
                }
                Ok(out)
            }
            OpKind::Prefix => Ok(input
                .iter()
                .map(|text| format!("{}{}", self.value, text))
                .collect()),
            OpKind::Suffix => Ok(input
                .iter()
                .map(|text| format!("{}{}", text, self.value))
                .collect()),
        }
    }
}

/// A named pipeline of operations producing typed values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parser {
    pub name: String,

    pub output: OutputType,

    #[serde(default)]
    pub operations: Vec<Operation>,

    /// Example URLs deciding which classes this parser applies to
    #[serde(default)]
    pub urls: Vec<String>,
}

impl Parser {
    /// Runs the pipeline over the input set.
    ///
    /// Returns `Ok(None)` when any stage produces an empty set. Tag output
    /// is lowercased on the final stage. Compile errors propagate.
    pub fn apply(&self, input: &[String]) -> Result<Option<Vec<String>>, ParseError> {
        let mut current: Vec<String> = input.to_vec();
        for operation in &self.operations {
            current = operation.run(&current)?;
            if current.is_empty() {
                return Ok(None);
            }
        }
        if current.is_empty() {
            return Ok(None);
        }
        if self.output == OutputType::Tag {
            for value in &mut current {
                *value = value.to_lowercase();
            }
        }
        Ok(Some(current))
    }

    /// Reports whether this parser applies to documents of the given class:
    /// its output type must be permitted by the class kind and at least one
    /// example URL must classify under the class.
    pub fn applies_to(&self, class: &UrlClass) -> bool {
        if !class.kind.permitted_outputs().contains(&self.output) {
            return false;
        }
        self.urls.iter().any(|example| match Url::parse(example) {
            Ok(url) => class.apply(&url).is_ok(),
            Err(err) => {
                tracing::warn!("bad example url {:?} on parser {:?}: {}", example, self.name, err);
                false
            }
        })
    }
}

/// A typed, parser-tagged sequence of extracted strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    /// Name of the producing parser
    pub parser: String,

    pub output: OutputType,

    pub values: Vec<String>,

    /// Name of the URL class the document was classified under
    pub class: String,
}

/// Ordered parse results for one source URL
pub type ParseResults = Vec<ParseResult>;

/// Runs every applicable parser against a document body.
///
/// Parsers whose output type the class forbids, or whose example URLs do
/// not classify under the class, are skipped. A failing parser is logged
/// and does not abort its siblings.
pub fn parse(body: &str, class: &UrlClass, parsers: &[Parser]) -> ParseResults {
    let input = vec![body.to_string()];
    let mut results = ParseResults::new();
    for parser in parsers {
        if !parser.applies_to(class) {
            continue;
        }
        match parser.apply(&input) {
            Ok(Some(values)) => results.push(ParseResult {
                parser: parser.name.clone(),
                output: parser.output,
                values,
                class: class.name.clone(),
            }),
            Ok(None) => {}
            Err(err) => tracing::warn!("parser {:?} failed: {}", parser.name, err),
        }
    }
    results
}
