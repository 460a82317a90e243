//! RFC-6265-ish cookie jar
//!
//! Entries are grouped under a jar key: the effective top-private domain of
//! the request host (the public suffix plus one label; bare IPs and
//! single-label hosts key as themselves). Within a group, a cookie's
//! identity is its (domain, path, name) triple; updates preserve the
//! original creation time and sequence number so selection order stays
//! stable.
//!
//! The jar implements [`reqwest::cookie::CookieStore`], so the live HTTP
//! client routes `Set-Cookie` and `Cookie` headers through it, and it
//! persists as a flat entry list (the keyed index is rebuilt on load).

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use url::Url;

/// A single stored cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub http_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub sequence: u64,
}

impl Cookie {
    /// Identity triple distinguishing cookies within a jar key.
    fn id(&self) -> String {
        format!("{};{};{}", self.domain, self.path, self.name)
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|at| at <= now).unwrap_or(false)
    }

    /// Parses a `Set-Cookie` header value in the context of a request URL.
    ///
    /// Returns `None` for values without a name=value pair. Unknown
    /// attributes are ignored.
    pub fn parse(header: &str, url: &Url) -> Option<Cookie> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let now = Utc::now();
        let mut cookie = Cookie {
            name: name.to_string(),
            value: value.trim().to_string(),
            domain: url.host_str().unwrap_or("").to_lowercase(),
            path: default_path(url.path()),
            expires: None,
            secure: false,
            http_only: false,
            same_site: None,
            created_at: now,
            last_access: now,
            sequence: 0,
        };

        for part in parts {
            let part = part.trim();
            let (attr, attr_value) = match part.split_once('=') {
                Some((a, v)) => (a.trim(), v.trim()),
                None => (part, ""),
            };
            match attr.to_ascii_lowercase().as_str() {
                "domain" => {
                    let domain = attr_value.trim_start_matches('.').to_lowercase();
                    if !domain.is_empty() {
                        cookie.domain = domain;
                    }
                }
                "path" => {
                    if attr_value.starts_with('/') {
                        cookie.path = attr_value.to_string();
                    }
                }
                "max-age" => {
                    if let Ok(seconds) = attr_value.parse::<i64>() {
                        cookie.expires = if seconds <= 0 {
                            Some(Utc.timestamp_opt(0, 0).single().unwrap_or(now))
                        } else {
                            Some(now + chrono::Duration::seconds(seconds))
                        };
                    }
                }
                "expires" => {
                    // Max-Age wins when both are present.
                    if cookie.expires.is_none() {
                        if let Ok(at) = DateTime::parse_from_rfc2822(attr_value) {
                            cookie.expires = Some(at.with_timezone(&Utc));
                        }
                    }
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = Some(attr_value.to_string()),
                _ => {}
            }
        }

        Some(cookie)
    }
}

/// The directory part of a request path, per RFC 6265 section 5.1.4.
fn default_path(path: &str) -> String {
    if path.is_empty() || !path.starts_with('/') {
        return "/".to_string();
    }
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

/// Derives the jar key for a host: the registrable domain where one
/// exists, otherwise the host itself.
pub fn jar_key(host: &str) -> String {
    let host = host.to_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() || !host.contains('.') {
        return host;
    }
    if let Some(domain) = psl::domain_str(&host) {
        return domain.to_string();
    }
    // No public-suffix entry: fall back to the last two labels.
    let mut labels: Vec<&str> = host.rsplitn(3, '.').collect();
    labels.truncate(2);
    labels.reverse();
    labels.join(".")
}

#[derive(Default)]
struct JarState {
    next_sequence: u64,
    entries: HashMap<String, HashMap<String, Cookie>>,
}

/// Thread-safe cookie jar
#[derive(Default)]
pub struct CookieJar {
    state: RwLock<JarState>,
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar::default()
    }

    /// Rebuilds a jar from a flat entry list (the persisted form).
    pub fn from_entries(entries: Vec<Cookie>) -> CookieJar {
        let jar = CookieJar::new();
        {
            let mut state = jar.state.write().expect("cookie jar poisoned");
            for cookie in entries {
                state.next_sequence = state.next_sequence.max(cookie.sequence + 1);
                state
                    .entries
                    .entry(jar_key(&cookie.domain))
                    .or_default()
                    .insert(cookie.id(), cookie);
            }
        }
        jar
    }

    /// Flattens the jar for persistence, ordered by sequence number.
    pub fn to_entries(&self) -> Vec<Cookie> {
        let state = self.state.read().expect("cookie jar poisoned");
        let mut entries: Vec<Cookie> = state
            .entries
            .values()
            .flat_map(|group| group.values().cloned())
            .collect();
        entries.sort_by_key(|cookie| cookie.sequence);
        entries
    }

    /// Stores cookies received for a URL.
    ///
    /// A cookie whose identity already exists keeps its creation time and
    /// sequence number; new identities get a fresh monotonic sequence.
    /// Non-http(s) URLs accept nothing.
    pub fn store_cookies(&self, url: &Url, cookies: Vec<Cookie>) {
        if cookies.is_empty() || !is_http(url) {
            return;
        }
        let Some(host) = url.host_str() else { return };
        let key = jar_key(host);

        let mut state = self.state.write().expect("cookie jar poisoned");
        for mut cookie in cookies {
            let id = cookie.id();
            let prior = state
                .entries
                .get(&key)
                .and_then(|group| group.get(&id))
                .map(|existing| (existing.created_at, existing.sequence));
            match prior {
                Some((created_at, sequence)) => {
                    cookie.created_at = created_at;
                    cookie.sequence = sequence;
                }
                None => {
                    cookie.sequence = state.next_sequence;
                    state.next_sequence += 1;
                }
            }
            cookie.last_access = Utc::now();
            state
                .entries
                .entry(key.clone())
                .or_default()
                .insert(id, cookie);
        }
    }

    /// Selects the cookies to send with a request to the URL, sorted by
    /// (longest path, earliest creation, lowest sequence). Non-http(s)
    /// URLs get nothing.
    pub fn cookies_for(&self, url: &Url) -> Vec<Cookie> {
        if !is_http(url) {
            return Vec::new();
        }
        let Some(host) = url.host_str() else {
            return Vec::new();
        };
        let host = host.to_lowercase();
        let key = jar_key(&host);
        let path = url.path();
        let now = Utc::now();

        let state = self.state.read().expect("cookie jar poisoned");
        let Some(group) = state.entries.get(&key) else {
            return Vec::new();
        };

        let mut selected: Vec<Cookie> = group
            .values()
            .filter(|cookie| !cookie.expired(now))
            .filter(|cookie| domain_matches(&host, &cookie.domain))
            .filter(|cookie| path_matches(path, &cookie.path))
            .filter(|cookie| !cookie.secure || url.scheme() == "https")
            .cloned()
            .collect();

        selected.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        selected
    }
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let cookies: Vec<Cookie> = headers
            .filter_map(|header| header.to_str().ok())
            .filter_map(|header| Cookie::parse(header, url))
            .collect();
        tracing::debug!("jar <= {} cookie(s) for {}", cookies.len(), url);
        self.store_cookies(url, cookies);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let selected = self.cookies_for(url);
        if selected.is_empty() {
            return None;
        }
        let header = selected
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        tracing::debug!("jar => {} cookie(s) for {}", selected.len(), url);
        HeaderValue::from_str(&header).ok()
    }
}
