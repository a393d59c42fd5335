//! The IdP session cookie ("Janus cookie"): extraction from a login jar and its
//! portable `domain;path;version;name;value` text form.

use crate::error::{JanusError, Result};
use crate::jar::{CookieJar, StoredCookie};

pub const DEFAULT_SESSION_PREFIX: &str = "_shibsession_";

/// Version written for cookies taken from a jar; consumers of the line expect 1.
pub const COOKIE_VERSION: u32 = 1;

/// One authenticated session with the IdP, detached from the jar that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: String,
    pub version: u32,
}

impl std::fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("path", &self.path)
            .field("domain", &self.domain)
            .field("version", &self.version)
            .finish()
    }
}

impl From<&StoredCookie> for SessionCookie {
    fn from(c: &StoredCookie) -> Self {
        Self {
            name: c.name.clone(),
            value: c.value.clone(),
            path: c.path.clone(),
            domain: c.domain.clone(),
            version: COOKIE_VERSION,
        }
    }
}

impl SessionCookie {
    /// `domain;path;version;name;value`, fields in that fixed order.
    pub fn to_line(&self) -> String {
        format!(
            "{};{};{};{};{}",
            self.domain, self.path, self.version, self.name, self.value
        )
    }

    /// Parse the output of [`SessionCookie::to_line`]. Everything after the fourth `;` is the value.
    pub fn from_line(line: &str) -> Result<Self> {
        let mut parts = line.trim().splitn(5, ';');
        let mut field = |what: &str| {
            parts
                .next()
                .ok_or_else(|| JanusError::CookieLine(format!("missing {what}")))
        };
        let domain = field("domain")?.to_string();
        let path = field("path")?.to_string();
        let version = field("version")?;
        let version = version
            .parse::<u32>()
            .map_err(|_| JanusError::CookieLine(format!("bad version {version:?}")))?;
        let name = field("name")?.to_string();
        let value = field("value")?.to_string();
        if name.is_empty() {
            return Err(JanusError::CookieLine("empty name".into()));
        }
        Ok(Self {
            name,
            value,
            path,
            domain,
            version,
        })
    }

    /// Value for a `Cookie` request header.
    pub fn header_value(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Find the session cookie in a login jar.
///
/// Several matches (e.g. one per SP application) resolve to the longest path, then to
/// the most recently set cookie, so the result never depends on jar internals.
/// An empty value is a cleared session, not a session.
pub fn extract(jar: &CookieJar, prefix: &str) -> Option<SessionCookie> {
    jar.iter()
        .filter(|c| c.name.starts_with(prefix) && !c.value.is_empty())
        .max_by(|a, b| {
            a.path
                .len()
                .cmp(&b.path.len())
                .then_with(|| a.seq.cmp(&b.seq))
        })
        .map(SessionCookie::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    fn sample() -> SessionCookie {
        SessionCookie {
            name: "_shibsession_x".into(),
            value: "abc".into(),
            path: "/".into(),
            domain: "example.org".into(),
            version: COOKIE_VERSION,
        }
    }

    #[test]
    fn test_to_line_fixed_order() {
        insta::assert_snapshot!(sample().to_line(), @"example.org;/;1;_shibsession_x;abc");
    }

    #[test]
    fn test_from_line_reads_to_line() {
        let line = "svc.example.org;/Shibboleth.sso;1;_shibsession_64656661756c74;_a1b2;c3";
        let c = SessionCookie::from_line(line).unwrap();
        assert_eq!(c.domain, "svc.example.org");
        assert_eq!(c.path, "/Shibboleth.sso");
        assert_eq!(c.version, 1);
        assert_eq!(c.name, "_shibsession_64656661756c74");
        assert_eq!(c.value, "_a1b2;c3");
        assert_eq!(c.to_line(), line);
    }

    #[test]
    fn test_from_line_errors() {
        assert!(SessionCookie::from_line("example.org;/;0;name").is_err());
        assert!(SessionCookie::from_line("example.org;/;zero;n;v").is_err());
        assert!(SessionCookie::from_line("example.org;/;0;;v").is_err());
    }

    #[test]
    fn test_header_value() {
        assert_eq!(sample().header_value(), "_shibsession_x=abc");
    }

    #[test]
    fn test_extract_absent() {
        let mut jar = CookieJar::new();
        let u = Url::parse("https://idp.example.org/").unwrap();
        jar.store(&u, "JSESSIONID=1; Path=/");
        jar.store(&u, "_idp_session=2; Path=/idp");
        assert!(extract(&jar, DEFAULT_SESSION_PREFIX).is_none());
    }

    #[test]
    fn test_extract_picks_prefixed_cookie() {
        let mut jar = CookieJar::new();
        let u = Url::parse("https://svc.example.org/Shibboleth.sso/SAML2/POST").unwrap();
        jar.store(&u, "JSESSIONID=1; Path=/");
        jar.store(&u, "_shibsession_64656661756c74=_abc; Path=/; Secure; HttpOnly");
        let c = extract(&jar, DEFAULT_SESSION_PREFIX).unwrap();
        assert_eq!(c.name, "_shibsession_64656661756c74");
        assert_eq!(c.value, "_abc");
        assert_eq!(c.domain, "svc.example.org");
        assert_eq!(c.path, "/");
        assert_eq!(c.version, 1);
        assert_eq!(c.to_line(), "svc.example.org;/;1;_shibsession_64656661756c74;_abc");
    }

    #[test]
    fn test_extract_ignores_cleared_session() {
        let u = Url::parse("https://svc.example.org/").unwrap();
        let mut jar = CookieJar::new();
        jar.store(&u, "_shibsession_x=old; Path=/");
        jar.store(&u, "_shibsession_x=; Path=/; Expires=Thu, 01-Jan-70 00:00:01 GMT");
        assert!(extract(&jar, DEFAULT_SESSION_PREFIX).is_none());

        // Emptied without an expiry.
        let mut jar = CookieJar::new();
        jar.store(&u, "_shibsession_x=; Path=/");
        assert!(extract(&jar, DEFAULT_SESSION_PREFIX).is_none());
    }

    #[test]
    fn test_extract_tie_break_path_then_recency() {
        let mut jar = CookieJar::new();
        let u = Url::parse("https://svc.example.org/app/x").unwrap();
        jar.store(&u, "_shibsession_old=1; Path=/");
        jar.store(&u, "_shibsession_app=2; Path=/app");
        jar.store(&u, "_shibsession_new=3; Path=/");
        assert_eq!(extract(&jar, DEFAULT_SESSION_PREFIX).unwrap().name, "_shibsession_app");

        let mut jar = CookieJar::new();
        jar.store(&u, "_shibsession_a=1; Path=/");
        jar.store(&u, "_shibsession_b=2; Path=/");
        assert_eq!(extract(&jar, DEFAULT_SESSION_PREFIX).unwrap().name, "_shibsession_b");
        jar.store(&u, "_shibsession_a=3; Path=/");
        assert_eq!(extract(&jar, DEFAULT_SESSION_PREFIX).unwrap().name, "_shibsession_a");
    }
}
