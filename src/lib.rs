//! Eridanus: a content acquisition and categorization engine
//!
//! This crate implements a crawling pipeline inspired by Hydrus Network:
//! seed URLs are classified against declarative rules, normalised to a
//! canonical form, fetched through a cached HTTP client, and parsed into
//! follow-up URLs, tag metadata, or binary content that lands in a
//! content-addressed store.

pub mod classifier;
pub mod command;
pub mod config;
pub mod cookies;
pub mod defaults;
pub mod fetcher;
pub mod idhash;
pub mod parser;
pub mod storage;

use thiserror::Error;

/// Main error type for Eridanus operations
#[derive(Debug, Error)]
pub enum EridanusError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("classification error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifier step failures
///
/// Each variant identifies the step that failed and the mismatched value.
/// `classify` catches these per rule and skips to the next candidate; only
/// [`ClassifyError::NoClassifier`] ever reaches a caller.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("domain mismatch: {host:?} does not match {domain:?}")]
    DomainMismatch { host: String, domain: String },

    #[error("path segment mismatch at index {index}: {segment:?}")]
    PathSegment { index: usize, segment: String },

    #[error("path length mismatch: no default for segment {index}")]
    PathLength { index: usize },

    #[error("query param mismatch for {key:?}: {value:?}")]
    QueryParam { key: String, value: String },

    #[error("no default for query param {key:?}")]
    MissingDefault { key: String },

    #[error("no classifier for {url}")]
    NoClassifier { url: String },
}

/// Parser operation failures
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid regex {pattern:?}: {message}")]
    Regex { pattern: String, message: String },

    #[error("invalid xpath {expr:?}: {message}")]
    Xpath { expr: String, message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for Eridanus operations
pub type Result<T> = std::result::Result<T, EridanusError>;

/// Result type alias for classifier operations
pub type ClassifyResult<T> = std::result::Result<T, ClassifyError>;

// Re-export commonly used types
pub use classifier::{classify, MatcherKind, ParamMatcher, StringMatcher, UrlClass, UrlKind};
pub use command::Command;
pub use config::Config;
pub use cookies::{Cookie, CookieJar};
pub use fetcher::Fetcher;
pub use idhash::{id_hash, IdHash};
pub use parser::{OpKind, Operation, OutputType, ParseResult, ParseResults, Parser};
pub use storage::Storage;
