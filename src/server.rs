//! Delegated cookie endpoint: `GET /cookie?url=<service>` with HTTP Basic credentials.
//!
//! The Basic credentials are replayed into the IdP login form and the resulting session
//! cookie is returned as one `domain;path;version;name;value` line. Every request gets
//! its own cookie jar; nothing is shared between requests but the HTTP clients.

use crate::credentials::{BasicAuthCredentials, CredentialSource};
use crate::error::Result;
use crate::login::LoginClient;
use crate::session::SessionCookie;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct AppState {
    pub login: LoginClient,
    pub realm: String,
    pub started_at: Instant,
}

#[derive(Debug, Deserialize)]
pub struct CookieQuery {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub version: String,
    pub uptime_secs: f64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cookie", get(cookie_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "cookie endpoint listening on GET /cookie");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

fn text(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// Log in with forwarded credentials and return the session cookie for `url`.
pub async fn delegated_cookie(
    login: &LoginClient,
    url: &str,
    source: &dyn CredentialSource,
) -> Result<SessionCookie> {
    let credentials = source.credentials()?;
    login.acquire(url, &credentials).await
}

/// Handler for GET /cookie: 200 + cookie line, 401 challenge without credentials.
pub async fn cookie_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CookieQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(credentials) = BasicAuthCredentials::from_headers(&headers) else {
        let challenge = format!("Basic realm=\"{}\"", state.realm);
        return (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, challenge)]).into_response();
    };
    let Some(url) = query.url.filter(|u| !u.trim().is_empty()) else {
        return text(
            StatusCode::BAD_REQUEST,
            "missing url query parameter".to_string(),
        );
    };

    match delegated_cookie(&state.login, &url, &credentials).await {
        Ok(cookie) => text(StatusCode::OK, cookie.to_line()),
        Err(e) => {
            warn!(%url, error = %e, "cookie request failed");
            text(e.http_status(), e.to_string())
        }
    }
}

/// Handler for GET /healthz: 200 + version and uptime.
pub async fn healthz_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(HealthBody {
        status: "ok",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs_f64(),
    })
}
