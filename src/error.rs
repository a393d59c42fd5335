//! Error taxonomy for the login and call flow.
//!
//! Config loading and the CLI use `anyhow`; everything that talks to the IdP or the
//! protected service returns [`JanusError`] so callers can tell a dead network apart
//! from IdP session churn.

use axum::http::StatusCode;

pub type Result<T, E = JanusError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum JanusError {
    /// Target or base address could not be parsed, or has no host.
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("too many redirects (more than {max}) starting at {url}")]
    TooManyRedirects { url: String, max: u32 },

    /// Login page reached but not usable: no form, or a required field is missing.
    #[error("login form: {0}")]
    LoginForm(String),

    #[error("Cannot retrieve Janus Cookie (no cookie with prefix {prefix:?} after login)")]
    CookieNotFound { prefix: String },

    /// The service still redirected after one fresh login.
    #[error("session still rejected by {url} after re-authentication")]
    ReauthExhausted { url: String },

    #[error("service returned {status}: {body}")]
    ServiceStatus { status: u16, body: String },

    #[error("credentials: {0}")]
    Credentials(String),

    #[error("malformed cookie line: {0}")]
    CookieLine(String),
}

impl JanusError {
    pub(crate) fn invalid_url(url: &str, reason: impl ToString) -> Self {
        JanusError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Status the delegated endpoint answers with for this error.
    pub fn http_status(&self) -> StatusCode {
        match self {
            JanusError::InvalidUrl { .. } | JanusError::CookieLine(_) => StatusCode::BAD_REQUEST,
            JanusError::CookieNotFound { .. } | JanusError::Credentials(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            JanusError::Transport(_)
            | JanusError::TooManyRedirects { .. }
            | JanusError::LoginForm(_)
            | JanusError::ReauthExhausted { .. }
            | JanusError::ServiceStatus { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}
