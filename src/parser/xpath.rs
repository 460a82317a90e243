//! XPath-subset evaluation over an HTML DOM
//!
//! Parser XPATH operations use location paths in the shape the rule sets
//! actually need: child (`/`) and descendant (`//`) axes, name or `*` node
//! tests, attribute predicates (`[@attr]`, `[@attr='v']`,
//! `[contains(@attr, 'v')]`), and a trailing `@attr` or `text()` extraction.
//! Expressions are compiled up front so malformed ones fail loudly, then
//! evaluated against a [`scraper::Html`] tree.

use crate::ParseError;
use scraper::{ElementRef, Html};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Any,
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    AttrExists { name: String },
    AttrEquals { name: String, value: String },
    AttrContains { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Extract {
    /// String value of the matched element (concatenated descendant text)
    Element,
    /// A named attribute of the matched element
    Attribute(String),
    /// Direct text children of the matched element
    Text,
}

/// A compiled XPath expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpathExpr {
    steps: Vec<Step>,
    extract: Extract,
}

impl XpathExpr {
    /// Compiles an expression, rejecting anything outside the supported
    /// subset with a [`ParseError::Xpath`].
    pub fn compile(expr: &str) -> Result<XpathExpr, ParseError> {
        Compiler::new(expr).compile()
    }

    /// Evaluates against a parsed document, emitting matched string values.
    pub fn eval(&self, html: &Html) -> Vec<String> {
        let root = html.root_element();

        let mut current: Vec<ElementRef> = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            let mut next: Vec<ElementRef> = Vec::new();
            let mut seen = HashSet::new();
            let candidates: Vec<ElementRef> = if index == 0 {
                match step.axis {
                    // The document node sits above the root element, so a
                    // leading `//` reaches the root element itself too.
                    Axis::Descendant => root
                        .descendants()
                        .filter_map(ElementRef::wrap)
                        .collect(),
                    Axis::Child => vec![root],
                }
            } else {
                current
                    .iter()
                    .flat_map(|ctx| match step.axis {
                        Axis::Child => ctx
                            .children()
                            .filter_map(ElementRef::wrap)
                            .collect::<Vec<_>>(),
                        Axis::Descendant => ctx
                            .descendants()
                            .skip(1)
                            .filter_map(ElementRef::wrap)
                            .collect::<Vec<_>>(),
                    })
                    .collect()
            };
            for element in candidates {
                if step.matches(&element) && seen.insert(element.id()) {
                    next.push(element);
                }
            }
            if next.is_empty() {
                return Vec::new();
            }
            current = next;
        }

        let mut values = Vec::new();
        for element in current {
            let value = match &self.extract {
                Extract::Element => element.text().collect::<String>().trim().to_string(),
                Extract::Attribute(name) => element
                    .value()
                    .attr(name)
                    .map(str::to_string)
                    .unwrap_or_default(),
                Extract::Text => element
                    .children()
                    .filter_map(|node| node.value().as_text())
                    .map(|text| &**text)
                    .collect::<String>()
                    .trim()
                    .to_string(),
            };
            if !value.is_empty() {
                values.push(value);
            }
        }
        values
    }
}

impl Step {
    fn matches(&self, element: &ElementRef) -> bool {
        match &self.test {
            NodeTest::Any => {}
            NodeTest::Name(name) => {
                if element.value().name() != name {
                    return false;
                }
            }
        }
        self.predicates.iter().all(|predicate| {
            let attr = |name: &str| element.value().attr(name);
            match predicate {
                Predicate::AttrExists { name } => attr(name).is_some(),
                Predicate::AttrEquals { name, value } => attr(name) == Some(value.as_str()),
                Predicate::AttrContains { name, value } => {
                    attr(name).is_some_and(|v| v.contains(value.as_str()))
                }
            }
        })
    }
}

struct Compiler<'a> {
    expr: &'a str,
    rest: &'a str,
}

impl<'a> Compiler<'a> {
    fn new(expr: &'a str) -> Self {
        Compiler {
            expr,
            rest: expr.trim(),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Xpath {
            expr: self.expr.to_string(),
            message: message.into(),
        }
    }

    fn compile(mut self) -> Result<XpathExpr, ParseError> {
        if !self.rest.starts_with('/') {
            return Err(self.error("expression must start with / or //"));
        }

        let mut steps = Vec::new();
        let mut extract = Extract::Element;
        while !self.rest.is_empty() {
            let axis = if let Some(rest) = self.rest.strip_prefix("//") {
                self.rest = rest;
                Axis::Descendant
            } else if let Some(rest) = self.rest.strip_prefix('/') {
                self.rest = rest;
                Axis::Child
            } else {
                return Err(self.error(format!("expected / before {:?}", self.rest)));
            };

            if let Some(rest) = self.rest.strip_prefix('@') {
                self.rest = rest;
                let name = self.take_name();
                if name.is_empty() {
                    return Err(self.error("missing attribute name after @"));
                }
                if !self.rest.is_empty() {
                    return Err(self.error("attribute selection must end the expression"));
                }
                if steps.is_empty() {
                    return Err(self.error("attribute selection needs a preceding step"));
                }
                let _ = axis;
                extract = Extract::Attribute(name);
                break;
            }

            if let Some(rest) = self.rest.strip_prefix("text()") {
                if !rest.is_empty() {
                    return Err(self.error("text() must end the expression"));
                }
                if steps.is_empty() {
                    return Err(self.error("text() needs a preceding step"));
                }
                self.rest = rest;
                extract = Extract::Text;
                break;
            }

            let test = if let Some(rest) = self.rest.strip_prefix('*') {
                self.rest = rest;
                NodeTest::Any
            } else {
                let name = self.take_name();
                if name.is_empty() {
                    return Err(self.error(format!("expected node test before {:?}", self.rest)));
                }
                NodeTest::Name(name)
            };

            let mut predicates = Vec::new();
            while self.rest.starts_with('[') {
                predicates.push(self.predicate()?);
            }

            steps.push(Step {
                axis,
                test,
                predicates,
            });
        }

        if steps.is_empty() {
            return Err(self.error("empty expression"));
        }

        Ok(XpathExpr { steps, extract })
    }

    fn predicate(&mut self) -> Result<Predicate, ParseError> {
        self.rest = self.rest.strip_prefix('[').unwrap_or(self.rest);
        self.skip_ws();

        let predicate = if let Some(rest) = self.rest.strip_prefix("contains(") {
            self.rest = rest;
            self.skip_ws();
            let name = self.attr_name()?;
            self.skip_ws();
            self.rest = self
                .rest
                .strip_prefix(',')
                .ok_or_else(|| self.error("expected , in contains()"))?;
            self.skip_ws();
            let value = self.quoted()?;
            self.skip_ws();
            self.rest = self
                .rest
                .strip_prefix(')')
                .ok_or_else(|| self.error("unterminated contains()"))?;
            Predicate::AttrContains { name, value }
        } else {
            let name = self.attr_name()?;
            self.skip_ws();
            if let Some(rest) = self.rest.strip_prefix('=') {
                self.rest = rest;
                self.skip_ws();
                let value = self.quoted()?;
                Predicate::AttrEquals { name, value }
            } else {
                Predicate::AttrExists { name }
            }
        };

        self.skip_ws();
        self.rest = self
            .rest
            .strip_prefix(']')
            .ok_or_else(|| self.error("unterminated predicate"))?;
        Ok(predicate)
    }

    fn attr_name(&mut self) -> Result<String, ParseError> {
        self.rest = self
            .rest
            .strip_prefix('@')
            .ok_or_else(|| self.error("only attribute predicates are supported"))?;
        let name = self.take_name();
        if name.is_empty() {
            return Err(self.error("missing attribute name in predicate"));
        }
        Ok(name)
    }

    fn quoted(&mut self) -> Result<String, ParseError> {
        let quote = match self.rest.chars().next() {
            Some(c @ ('\'' | '"')) => c,
            _ => return Err(self.error("expected quoted string")),
        };
        let body = &self.rest[1..];
        let end = body
            .find(quote)
            .ok_or_else(|| self.error("unterminated string"))?;
        let value = body[..end].to_string();
        self.rest = &body[end + 1..];
        Ok(value)
    }

    fn take_name(&mut self) -> String {
        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':')))
            .unwrap_or(self.rest.len());
        let name = self.rest[..end].to_string();
        self.rest = &self.rest[end..];
        name
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }
}
