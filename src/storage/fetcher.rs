//! Fetch-plane persistence: response cache, parse-result cache, cookies
//!
//! Both caches key by the md5 of the URL string. A cached response is the
//! serialised request followed by the serialised response, each preceded by
//! its length, as `<reqLen>\n<reqBytes><resLen>\n<resBytes>`, so both halves
//! parse back as HTTP/1.1 text. The request half records the final request
//! of the exchange, which makes cached entries redirect-safe: the stored
//! target is the URL the response actually came from.

use super::backend::Backend;
use super::{StorageError, StorageResult};
use crate::cookies::CookieJar;
use crate::parser::ParseResults;
use md5::{Digest, Md5};
use std::sync::Arc;
use url::Url;

const WEBCACHE_NAMESPACE: &str = "web_cache";
const WEBRESULT_NAMESPACE: &str = "web_result";
const COOKIES_KEY: &str = "config/cookies.json";

/// A parsed HTTP exchange as stored in the response cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub method: String,
    /// Final request URL of the exchange (after any redirects)
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    /// Serialises the exchange into the length-prefixed on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n\r\n",
            self.method,
            self.url,
            self.url.host_str().unwrap_or("")
        );

        let reason = reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("");
        let mut response = format!("HTTP/1.1 {} {}\r\n", self.status, reason).into_bytes();
        for (name, value) in &self.headers {
            response.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        response.extend_from_slice(b"\r\n");
        response.extend_from_slice(&self.body);

        let mut out = Vec::with_capacity(request.len() + response.len() + 24);
        out.extend_from_slice(format!("{}\n", request.len()).as_bytes());
        out.extend_from_slice(request.as_bytes());
        out.extend_from_slice(format!("{}\n", response.len()).as_bytes());
        out.extend_from_slice(&response);
        out
    }

    /// Parses the on-disk form back into an exchange.
    pub fn from_bytes(data: &[u8]) -> StorageResult<CachedResponse> {
        let (request_bytes, rest) = read_sized(data)?;
        let (response_bytes, _) = read_sized(rest)?;

        let (method, url) = parse_request(request_bytes)?;
        let (status, headers, body) = parse_response(response_bytes)?;

        Ok(CachedResponse {
            method,
            url,
            status,
            headers,
            body,
        })
    }
}

fn corrupt(message: impl Into<String>) -> StorageError {
    StorageError::CorruptCache(message.into())
}

/// Reads a `<len>\n<bytes>` block, returning the block and the remainder.
fn read_sized(data: &[u8]) -> StorageResult<(&[u8], &[u8])> {
    let newline = data
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| corrupt("missing length prefix"))?;
    let length: usize = std::str::from_utf8(&data[..newline])
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| corrupt("bad length prefix"))?;
    let rest = &data[newline + 1..];
    if rest.len() < length {
        return Err(corrupt(format!(
            "truncated block: want {} bytes, have {}",
            length,
            rest.len()
        )));
    }
    Ok((&rest[..length], &rest[length..]))
}

fn parse_request(data: &[u8]) -> StorageResult<(String, Url)> {
    let text = std::str::from_utf8(data).map_err(|_| corrupt("request is not utf-8"))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| corrupt("missing method"))?
        .to_string();
    let target = parts.next().ok_or_else(|| corrupt("missing target"))?;

    let url = if target.starts_with('/') {
        // Origin-form target: reassemble from the Host header.
        let host = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("host"))
            .map(|(_, value)| value.trim().to_string())
            .ok_or_else(|| corrupt("origin-form target without Host header"))?;
        Url::parse(&format!("https://{}{}", host, target))
            .map_err(|err| corrupt(format!("bad target: {}", err)))?
    } else {
        Url::parse(target).map_err(|err| corrupt(format!("bad target: {}", err)))?
    };

    Ok((method, url))
}

type ResponseParts = (u16, Vec<(String, String)>, Vec<u8>);

fn parse_response(data: &[u8]) -> StorageResult<ResponseParts> {
    let split = data
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| corrupt("missing header terminator"))?;
    let head = std::str::from_utf8(&data[..split])
        .map_err(|_| corrupt("response head is not utf-8"))?;
    let body = data[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| corrupt("bad status line"))?;

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Ok((status, headers, body))
}

fn url_key(namespace: &str, url: &Url) -> String {
    format!("{}/{}", namespace, hex::encode(Md5::digest(url.as_str())))
}

/// Storage plane for the fetch loop
pub struct FetcherStorage {
    backend: Arc<Backend>,
    cookies: Arc<CookieJar>,
}

impl FetcherStorage {
    /// Loads the cookie jar from the backend and registers its persistence
    /// as a shutdown hook.
    pub fn open(backend: Arc<Backend>) -> StorageResult<FetcherStorage> {
        let cookies = if backend.has(COOKIES_KEY) {
            let blob = backend.get(COOKIES_KEY)?;
            Arc::new(CookieJar::from_entries(serde_json::from_slice(&blob)?))
        } else {
            Arc::new(CookieJar::new())
        };

        let hook_backend = backend.clone();
        let hook_cookies = cookies.clone();
        backend.register_on_close(Box::new(move || {
            let blob = serde_json::to_vec_pretty(&hook_cookies.to_entries())?;
            hook_backend.set(COOKIES_KEY, &blob)
        }));

        Ok(FetcherStorage { backend, cookies })
    }

    pub fn cookies(&self) -> Arc<CookieJar> {
        self.cookies.clone()
    }

    /// Parse results previously recorded for the URL.
    pub fn get_results(&self, url: &Url) -> StorageResult<ParseResults> {
        let blob = self.backend.get(&url_key(WEBRESULT_NAMESPACE, url))?;
        Ok(serde_yaml::from_slice(&blob)?)
    }

    pub fn set_results(&self, url: &Url, results: &ParseResults) -> StorageResult<()> {
        let blob = serde_yaml::to_string(results)?;
        self.backend
            .set(&url_key(WEBRESULT_NAMESPACE, url), blob.as_bytes())
    }

    pub fn has_results(&self, url: &Url) -> bool {
        self.backend.has(&url_key(WEBRESULT_NAMESPACE, url))
    }

    /// Cached HTTP exchange for the URL, if any.
    pub fn get_cached(&self, url: &Url) -> StorageResult<CachedResponse> {
        let blob = self.backend.get(&url_key(WEBCACHE_NAMESPACE, url))?;
        CachedResponse::from_bytes(&blob)
    }

    pub fn set_cached(&self, url: &Url, response: &CachedResponse) -> StorageResult<()> {
        self.backend
            .set(&url_key(WEBCACHE_NAMESPACE, url), &response.to_bytes())
    }

    pub fn has_cached(&self, url: &Url) -> bool {
        self.backend.has(&url_key(WEBCACHE_NAMESPACE, url))
    }

    pub fn delete_cached(&self, url: &Url) -> StorageResult<()> {
        self.backend.delete(&url_key(WEBCACHE_NAMESPACE, url))
    }
}
