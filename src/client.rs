//! HTTP transport: reqwest clients with timeouts from config and two TLS profiles.
//!
//! Redirects are never followed by reqwest itself. The login flow follows them by hand
//! (to see every `Set-Cookie`), and the service caller needs the raw 3xx as its
//! session-expiry signal.
//!
//! The insecure profile (no chain or hostname verification) is only handed out for
//! hosts listed in `transport.insecure_tls_hosts`, or for everything when
//! `transport.insecure_tls_all` is set.

use crate::config::TransportConfig;
use crate::error::Result;
use reqwest::{Client, Url, redirect};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProfile {
    Verified,
    /// Self-signed IdP: certificate chain and hostname are not checked.
    Insecure,
}

/// Pair of clients sharing connection settings; picks the TLS profile per request URL.
#[derive(Debug, Clone)]
pub struct Transport {
    verified: Client,
    insecure: Client,
    insecure_hosts: Vec<String>,
    insecure_all: bool,
}

impl Transport {
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        if config.insecure_tls_all {
            warn!("TLS verification disabled for all hosts (transport.insecure_tls_all)");
        }
        Ok(Self {
            verified: build_client(config, TlsProfile::Verified)?,
            insecure: build_client(config, TlsProfile::Insecure)?,
            insecure_hosts: config
                .insecure_tls_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
            insecure_all: config.insecure_tls_all,
        })
    }

    pub fn profile_for(&self, url: &Url) -> TlsProfile {
        if url.scheme() != "https" {
            return TlsProfile::Verified;
        }
        let host = url.host_str().map(str::to_ascii_lowercase);
        let listed = host
            .as_deref()
            .is_some_and(|h| self.insecure_hosts.iter().any(|allowed| allowed == h));
        if self.insecure_all || listed {
            TlsProfile::Insecure
        } else {
            TlsProfile::Verified
        }
    }

    pub fn client_for(&self, url: &Url) -> &Client {
        match self.profile_for(url) {
            TlsProfile::Verified => &self.verified,
            TlsProfile::Insecure => &self.insecure,
        }
    }
}

/// Build a reqwest client with timeouts from transport config. Never follows redirects.
fn build_client(config: &TransportConfig, profile: TlsProfile) -> Result<Client> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let connect_timeout = Duration::from_secs(std::cmp::min(
        config.connect_timeout_secs,
        config.timeout_secs,
    ));
    let client = Client::builder()
        .user_agent(concat!("janus/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .redirect(redirect::Policy::none())
        // With rustls this also skips hostname verification.
        .danger_accept_invalid_certs(profile == TlsProfile::Insecure)
        .build()?;
    Ok(client)
}
