//! Cookie jar for one login attempt.
//!
//! Parses `Set-Cookie` headers from every hop of the login flow and replays matching
//! cookies on later requests, like a browser would (RFC 6265 domain and path matching,
//! `Max-Age`/`Expires` deletion). Iteration order is deterministic: first insertion,
//! with replacements keeping their slot.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use cookie::Cookie;
use reqwest::Url;
use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// Lowercase, without leading dot.
    pub domain: String,
    /// No `Domain` attribute: only sent back to the exact host that set it.
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub expires: Option<DateTime<Utc>>,
    /// Monotonic counter of when this cookie was last set; higher is more recent.
    pub seq: u64,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e <= now)
    }

    fn domain_matches(&self, host: &str) -> bool {
        if self.host_only {
            return host == self.domain;
        }
        host == self.domain || is_subdomain_of(host, &self.domain)
    }

    fn path_matches(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/')
                || request_path.as_bytes().get(self.path.len()) == Some(&b'/'))
    }
}

#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
    next_seq: u64,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store every `Set-Cookie` header of a response received from `url`.
    pub fn store_response(&mut self, url: &Url, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE).iter() {
            match value.to_str() {
                Ok(s) => {
                    self.store(url, s);
                }
                Err(_) => debug!(%url, "ignoring non-ascii set-cookie header"),
            }
        }
    }

    /// Store one `Set-Cookie` value. Returns false when the header was rejected
    /// (malformed, or a `Domain` the response host may not set).
    pub fn store(&mut self, url: &Url, set_cookie: &str) -> bool {
        let now = Utc::now();
        let Some(mut cookie) = parse_set_cookie(url, set_cookie, now) else {
            debug!(%url, "rejected set-cookie header");
            return false;
        };
        let existing = self.cookies.iter().position(|c| {
            c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
        });
        if cookie.is_expired(now) {
            if let Some(i) = existing {
                self.cookies.remove(i);
            }
            debug!(name = %cookie.name, domain = %cookie.domain, "cookie deleted");
            return true;
        }
        self.next_seq += 1;
        cookie.seq = self.next_seq;
        debug!(name = %cookie.name, domain = %cookie.domain, path = %cookie.path, "cookie stored");
        match existing {
            Some(i) => self.cookies[i] = cookie,
            None => self.cookies.push(cookie),
        }
        true
    }

    /// `Cookie` header value for a request to `url`, longest path first.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        let now = Utc::now();
        let secure_channel = url.scheme() == "https";
        let mut matching: Vec<&StoredCookie> = self
            .cookies
            .iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| !c.secure || secure_channel)
            .filter(|c| c.domain_matches(&host) && c.path_matches(url.path()))
            .collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matching
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Unexpired cookies in jar order.
    pub fn iter(&self) -> impl Iterator<Item = &StoredCookie> {
        let now = Utc::now();
        self.cookies.iter().filter(move |c| !c.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_set_cookie(url: &Url, header: &str, now: DateTime<Utc>) -> Option<StoredCookie> {
    let host = url.host_str()?.to_ascii_lowercase();
    let parsed = Cookie::parse(header).ok()?;
    let name = parsed.name().trim();
    if name.is_empty() {
        return None;
    }

    let domain_attr = parsed
        .domain()
        .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty());
    let (domain, host_only) = match domain_attr {
        Some(d) if d == host => (d, false),
        // IP literals and single-label domains only ever name the exact host.
        Some(d) if is_ip_literal(&host) || !d.contains('.') => {
            debug!(%url, domain = %d, "domain attribute not allowed for this host");
            return None;
        }
        Some(d) if is_subdomain_of(&host, &d) => (d, false),
        Some(_) => return None,
        None => (host, true),
    };

    // Max-Age wins over Expires.
    let expires = match parsed.max_age() {
        Some(age) if age.whole_seconds() <= 0 => Some(DateTime::<Utc>::MIN_UTC),
        Some(age) => chrono::Duration::try_seconds(age.whole_seconds())
            .and_then(|d| now.checked_add_signed(d)),
        None => parsed
            .expires_datetime()
            .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0)),
    };

    let path = parsed
        .path()
        .filter(|p| p.starts_with('/'))
        .map(str::to_string)
        .unwrap_or_else(|| default_path(url.path()));

    Some(StoredCookie {
        name: name.to_string(),
        value: parsed.value_trimmed().to_string(),
        domain,
        host_only,
        path,
        secure: parsed.secure().unwrap_or(false),
        expires,
        seq: 0,
    })
}

fn is_ip_literal(host: &str) -> bool {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}

/// `host` is a strict subdomain of `domain` (label boundary, not a plain suffix).
fn is_subdomain_of(host: &str, domain: &str) -> bool {
    host.len() > domain.len()
        && host.ends_with(domain)
        && host[..host.len() - domain.len()].ends_with('.')
}

/// Directory of the request path (RFC 6265 section 5.1.4).
fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => request_path[..i].to_string(),
    }
}
