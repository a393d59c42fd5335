//! Where the username/password pair for the IdP login comes from.

use crate::config::{CredentialsConfig, read_secret};
use crate::error::{JanusError, Result};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;

/// Username/password for one login. Never persisted; the password is redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies the credentials used when a (re-)login is needed.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Result<Credentials>;
}

/// Fixed credentials resolved from config (file, env or literal) for the CLI harness.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }

    pub fn from_config(config: &CredentialsConfig) -> anyhow::Result<Self> {
        let username = read_secret(
            config.username_file.as_deref(),
            config.username_env.as_deref(),
            config.username.as_deref(),
        )?
        .ok_or_else(|| anyhow::anyhow!("credentials: no username configured"))?;
        let password = read_secret(
            config.password_file.as_deref(),
            config.password_env.as_deref(),
            config.password.as_deref(),
        )?
        .ok_or_else(|| anyhow::anyhow!("credentials: no password configured"))?;
        Ok(Self(Credentials::new(username, password)))
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// Credentials forwarded from an inbound `Authorization: Basic` header.
#[derive(Debug, Clone)]
pub struct BasicAuthCredentials(Credentials);

impl BasicAuthCredentials {
    /// None when the header is absent, not Basic, or not decodable as `user:password`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
        let (scheme, encoded) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        if username.is_empty() {
            return None;
        }
        Some(Self(Credentials::new(username, password)))
    }
}

impl CredentialSource for BasicAuthCredentials {
    fn credentials(&self) -> Result<Credentials> {
        if self.0.username.is_empty() {
            return Err(JanusError::Credentials("empty username".into()));
        }
        Ok(self.0.clone())
    }
}
