//! Calls to the cookie-protected service, with one transparent re-login.
//!
//! A redirect from the service means the IdP no longer honours the session cookie.
//! The caller logs in again, swaps the cookie and retries the request once; a second
//! redirect is reported as [`JanusError::ReauthExhausted`] instead of looping.

use crate::client::Transport;
use crate::credentials::CredentialSource;
use crate::error::{JanusError, Result};
use crate::login::{LoginClient, derive_host};
use crate::session::SessionCookie;
use reqwest::header::{ACCEPT, COOKIE, HeaderMap};
use reqwest::{StatusCode, Url};
use tracing::{debug, info, warn};

/// Decides whether a service response means "session expired, log in again".
pub type ExpiryCheck = fn(StatusCode, &HeaderMap) -> bool;

/// Default expiry signal: any 3xx (the SP bouncing the browser to the IdP).
pub fn is_session_expired(status: StatusCode, _headers: &HeaderMap) -> bool {
    status.is_redirection()
}

/// Protected endpoint: service base address plus the sub-path to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub base_address: String,
    pub path: String,
}

impl ResourceDescriptor {
    pub fn new(base_address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_address: base_address.into(),
            path: path.into(),
        }
    }

    /// Base address and sub-path joined with exactly one `/`.
    pub fn url(&self) -> Result<Url> {
        let base = self.base_address.trim_end_matches('/');
        let sub = self.path.trim_start_matches('/');
        let joined = if sub.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, sub)
        };
        Url::parse(&joined).map_err(|e| JanusError::invalid_url(&joined, e))
    }

    /// Where the IdP login page lives for this resource.
    pub fn host(&self) -> Result<String> {
        derive_host(&self.base_address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No cookie yet; the first call logs in.
    Unauthenticated,
    Authenticated(SessionCookie),
    /// A login is in progress, or the last one failed.
    Reauthenticating,
}

enum Attempt {
    Body(String),
    Expired(StatusCode),
}

pub struct ServiceCaller<C> {
    login: LoginClient,
    transport: Transport,
    credentials: C,
    state: SessionState,
    accept: String,
    expiry: ExpiryCheck,
    requests: u32,
    logins: u32,
}

impl<C: CredentialSource> ServiceCaller<C> {
    pub fn new(
        login: LoginClient,
        transport: Transport,
        credentials: C,
        session: Option<SessionCookie>,
    ) -> Self {
        Self {
            login,
            transport,
            credentials,
            state: session.map_or(SessionState::Unauthenticated, SessionState::Authenticated),
            accept: "text/xml".to_string(),
            expiry: is_session_expired,
            requests: 0,
            logins: 0,
        }
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    /// Swap the expiry predicate, e.g. for an IdP gateway that answers 401 instead of 3xx.
    pub fn with_expiry_check(mut self, expiry: ExpiryCheck) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session(&self) -> Option<&SessionCookie> {
        match &self.state {
            SessionState::Authenticated(cookie) => Some(cookie),
            _ => None,
        }
    }

    /// Requests sent to the service and logins performed since creation.
    pub fn counters(&self) -> (u32, u32) {
        (self.requests, self.logins)
    }

    /// GET the resource with the session cookie and return the body.
    ///
    /// Any 2xx is a success, including 204 or an empty body (returned as `""`).
    pub async fn call(&mut self, resource: &ResourceDescriptor) -> Result<String> {
        let url = resource.url()?;
        let cookie = match self.session().cloned() {
            Some(cookie) => cookie,
            None => self.refresh(resource).await?,
        };

        match self.attempt(&url, &cookie).await? {
            Attempt::Body(body) => return Ok(body),
            Attempt::Expired(status) => {
                warn!(%url, status = status.as_u16(), "session rejected, logging in again");
            }
        }

        let cookie = self.refresh(resource).await?;
        match self.attempt(&url, &cookie).await? {
            Attempt::Body(body) => Ok(body),
            Attempt::Expired(status) => {
                warn!(%url, status = status.as_u16(), "fresh session rejected too");
                Err(JanusError::ReauthExhausted {
                    url: url.to_string(),
                })
            }
        }
    }

    /// Log in again and replace the held cookie.
    pub async fn refresh(&mut self, resource: &ResourceDescriptor) -> Result<SessionCookie> {
        self.state = SessionState::Reauthenticating;
        let credentials = self.credentials.credentials()?;
        self.logins += 1;
        let cookie = self
            .login
            .acquire(&resource.base_address, &credentials)
            .await?;
        info!(name = %cookie.name, "session cookie refreshed");
        self.state = SessionState::Authenticated(cookie.clone());
        Ok(cookie)
    }

    async fn attempt(&mut self, url: &Url, cookie: &SessionCookie) -> Result<Attempt> {
        self.requests += 1;
        let response = self
            .transport
            .client_for(url)
            .get(url.clone())
            .header(COOKIE, cookie.header_value())
            .header(ACCEPT, self.accept.as_str())
            .send()
            .await?;
        let status = response.status();
        debug!(%url, status = status.as_u16(), "service response");
        if (self.expiry)(status, response.headers()) {
            return Ok(Attempt::Expired(status));
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(JanusError::ServiceStatus {
                status: status.as_u16(),
                body: body.lines().next().unwrap_or("").trim().to_string(),
            });
        }
        Ok(Attempt::Body(body))
    }
}
