//! Form login against the IdP: fetch the login page at the host root, submit the
//! first form with the credentials, follow the redirect chain and SAML POST-binding
//! pages, and hand back the resulting cookie jar.
//!
//! Each call to [`LoginClient::login`] starts from an empty jar. Terminal status codes
//! are not errors here: a 404 at the end of the chain is fine as long as the session
//! cookie was set on the way.

use crate::client::Transport;
use crate::config::LoginConfig;
use crate::credentials::Credentials;
use crate::error::{JanusError, Result};
use crate::form::{self, FormSubmission, LoginFields};
use crate::jar::CookieJar;
use crate::session::{self, SessionCookie};
use reqwest::header::{COOKIE, LOCATION};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, info, warn};

/// `<protocol>://<host>[:port]` of a service URL: where the IdP login page lives.
pub fn derive_host(base_address: &str) -> Result<String> {
    let url = Url::parse(base_address).map_err(|e| JanusError::invalid_url(base_address, e))?;
    let host = url
        .host_str()
        .ok_or_else(|| JanusError::invalid_url(base_address, "no host"))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Final response of a request after redirects.
#[derive(Debug)]
struct Page {
    url: Url,
    status: StatusCode,
    body: String,
}

#[derive(Debug, Clone)]
pub struct LoginClient {
    transport: Transport,
    fields: LoginFields,
    session_prefix: String,
    max_redirects: u32,
    max_auto_submits: u32,
}

impl LoginClient {
    pub fn new(transport: Transport, config: &LoginConfig) -> Self {
        Self {
            transport,
            fields: LoginFields {
                username: config.username_field.clone(),
                password: config.password_field.clone(),
                submit: config.submit_field.clone(),
            },
            session_prefix: config.session_cookie_prefix.clone(),
            max_redirects: config.max_redirects,
            max_auto_submits: config.max_auto_submits,
        }
    }

    pub fn session_prefix(&self) -> &str {
        &self.session_prefix
    }

    /// Log in at `host_url` and return every cookie collected along the way.
    pub async fn login(&self, host_url: &str, credentials: &Credentials) -> Result<CookieJar> {
        let url = Url::parse(host_url).map_err(|e| JanusError::invalid_url(host_url, e))?;
        let mut jar = CookieJar::new();
        debug!(%url, username = %credentials.username, "fetching login page");
        let page = self.send(&mut jar, Method::GET, url, None).await?;
        let submission =
            form::build_login_submission(&page.body, &page.url, &self.fields, credentials)?;
        debug!(action = %submission.action, method = %submission.method, "submitting login form");
        let mut page = self.submit(&mut jar, submission).await?;

        for _ in 0..self.max_auto_submits {
            let Some(next) = form::find_auto_submit(&page.body, &page.url)? else {
                break;
            };
            debug!(action = %next.action, "following SAML POST binding");
            page = self.submit(&mut jar, next).await?;
        }

        info!(
            final_url = %page.url,
            status = page.status.as_u16(),
            cookies = jar.len(),
            "login flow finished"
        );
        Ok(jar)
    }

    /// Log in for the service at `target_url` and pull out the session cookie.
    pub async fn acquire(
        &self,
        target_url: &str,
        credentials: &Credentials,
    ) -> Result<SessionCookie> {
        let host = derive_host(target_url)?;
        let jar = self.login(&host, credentials).await?;
        match session::extract(&jar, &self.session_prefix) {
            Some(cookie) => {
                info!(name = %cookie.name, domain = %cookie.domain, "session cookie acquired");
                Ok(cookie)
            }
            None => {
                let names: Vec<&str> = jar.iter().map(|c| c.name.as_str()).collect();
                warn!(%host, ?names, "no session cookie after login");
                Err(JanusError::CookieNotFound {
                    prefix: self.session_prefix.clone(),
                })
            }
        }
    }

    async fn submit(&self, jar: &mut CookieJar, submission: FormSubmission) -> Result<Page> {
        let FormSubmission {
            method,
            mut action,
            fields,
        } = submission;
        if method == Method::GET {
            action.set_query(None);
        }
        self.send(jar, method, action, Some(fields)).await
    }

    /// One request, following redirects by hand so every hop's cookies land in the jar.
    async fn send(
        &self,
        jar: &mut CookieJar,
        mut method: Method,
        mut url: Url,
        mut fields: Option<Vec<(String, String)>>,
    ) -> Result<Page> {
        let start = url.to_string();
        for _ in 0..=self.max_redirects {
            let client = self.transport.client_for(&url);
            let mut req = client.request(method.clone(), url.clone());
            if let Some(cookie) = jar.header_for(&url) {
                req = req.header(COOKIE, cookie);
            }
            if let Some(fields) = &fields {
                req = if method == Method::GET {
                    req.query(fields)
                } else {
                    req.form(fields)
                };
            }
            let response = req.send().await?;
            jar.store_response(&url, response.headers());
            let status = response.status();

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if let Some(location) = location.filter(|_| status.is_redirection()) {
                let next = url
                    .join(&location)
                    .map_err(|e| JanusError::invalid_url(&location, e))?;
                debug!(status = status.as_u16(), from = %url, to = %next, "redirect");
                // 307/308 replay method and body; the others turn into a plain GET.
                // A GET's fields already went out in the query the server redirected from,
                // and a form body never follows a redirect to another origin.
                let replay = matches!(
                    status,
                    StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
                );
                if !replay {
                    method = Method::GET;
                    fields = None;
                } else if method == Method::GET {
                    fields = None;
                } else if fields.is_some() && next.origin() != url.origin() {
                    debug!(from = %url, to = %next, "dropping form body on cross-origin redirect");
                    fields = None;
                }
                url = next;
                continue;
            }

            let body = response.text().await?;
            return Ok(Page { url, status, body });
        }
        Err(JanusError::TooManyRedirects {
            url: start,
            max: self.max_redirects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGIN_PAGE: &str = r#"<html><body>
<form method="post" action="/idp/login">
  <input type="hidden" name="execution" value="e1s1">
  <input name="username"><input type="password" name="password">
  <input type="submit" name="submit" value="Connexion">
</form></body></html>"#;

    fn client() -> LoginClient {
        let transport = Transport::from_config(&TransportConfig::default()).unwrap();
        LoginClient::new(transport, &LoginConfig::default())
    }

    async fn mount_login_page(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Set-Cookie", "JSESSIONID=j1; Path=/")
                    .set_body_string(LOGIN_PAGE),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn test_derive_host() {
        assert_eq!(
            derive_host("https://svc.example.org/services/rs/sample/infos").unwrap(),
            "https://svc.example.org"
        );
        assert_eq!(
            derive_host("https://svc.example.org/services?x=1#frag").unwrap(),
            "https://svc.example.org"
        );
        assert_eq!(
            derive_host("http://127.0.0.1:8443/a/b").unwrap(),
            "http://127.0.0.1:8443"
        );
    }

    #[test]
    fn test_derive_host_idempotent() {
        let once = derive_host("https://svc.example.org/services/rs/sample/infos").unwrap();
        assert_eq!(derive_host(&once).unwrap(), once);
    }

    #[test]
    fn test_derive_host_malformed() {
        assert!(matches!(
            derive_host("svc.example.org/services"),
            Err(JanusError::InvalidUrl { .. })
        ));
        assert!(matches!(
            derive_host("mailto:someone@example.org"),
            Err(JanusError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_valid_credentials_yield_session_cookie() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/idp/login"))
            .and(header("cookie", "JSESSIONID=j1"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("password=good"))
            .and(body_string_contains("execution=e1s1"))
            .and(body_string_contains("submit=Connexion"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "/welcome")
                    .insert_header("Set-Cookie", "_shibsession_64656661756c74=sess42; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        // Terminal 404 is fine: only the cookie matters.
        Mock::given(method("GET"))
            .and(path("/welcome"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let target = format!("{}/services/rs/sample/infos", server.uri());
        let cookie = client()
            .acquire(&target, &Credentials::new("alice", "good"))
            .await
            .unwrap();
        assert!(cookie.name.starts_with("_shibsession_"));
        assert_eq!(cookie.value, "sess42");
        assert_eq!(cookie.domain, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_invalid_credentials_yield_no_cookie() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/idp/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
            .mount(&server)
            .await;

        let c = client();
        let jar = c
            .login(&server.uri(), &Credentials::new("alice", "wrong"))
            .await
            .unwrap();
        assert!(session::extract(&jar, c.session_prefix()).is_none());
        assert_eq!(jar.len(), 1);

        let err = c
            .acquire(&server.uri(), &Credentials::new("alice", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::CookieNotFound { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_saml_post_binding_followed() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        let saml_page = r#"<html><body onload="document.forms[0].submit()">
<form method="post" action="/Shibboleth.sso/SAML2/POST">
<input type="hidden" name="RelayState" value="cookie:1"><input type="hidden" name="SAMLResponse" value="PHNhbWw+">
</form></body></html>"#;
        Mock::given(method("POST"))
            .and(path("/idp/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(saml_page))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Shibboleth.sso/SAML2/POST"))
            .and(body_string_contains("SAMLResponse="))
            .respond_with(
                ResponseTemplate::new(303)
                    .insert_header("Location", "/services/rs/sample/infos")
                    .insert_header("Set-Cookie", "_shibsession_app=fromsp; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/rs/sample/infos"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<infos/>"))
            .expect(1)
            .mount(&server)
            .await;

        let cookie = client()
            .acquire(&server.uri(), &Credentials::new("alice", "good"))
            .await
            .unwrap();
        assert_eq!(cookie.name, "_shibsession_app");
        assert_eq!(cookie.value, "fromsp");
    }

    #[tokio::test]
    async fn test_login_page_without_form() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;
        let err = client()
            .acquire(&server.uri(), &Credentials::new("alice", "good"))
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::LoginForm(_)), "{err}");
    }

    #[tokio::test]
    async fn test_redirect_loop_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/"))
            .expect(11)
            .mount(&server)
            .await;
        let err = client()
            .login(&server.uri(), &Credentials::new("alice", "good"))
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::TooManyRedirects { max: 10, .. }), "{err}");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let err = client()
            .login("http://127.0.0.1:1", &Credentials::new("alice", "good"))
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn test_get_form_fields_not_replayed_after_redirect() {
        let server = MockServer::start().await;
        let get_form = r#"<form method="get" action="/idp/login?stale=1">
<input name="username"><input type="password" name="password"><input type="submit" name="submit" value="Go">
</form>"#;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(get_form))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/idp/login"))
            .respond_with(
                ResponseTemplate::new(307).insert_header("Location", "/idp/next?ticket=1"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/idp/next"))
            .respond_with(ResponseTemplate::new(200).set_body_string("done"))
            .expect(1)
            .mount(&server)
            .await;

        client()
            .login(&server.uri(), &Credentials::new("alice", "good"))
            .await
            .unwrap();
        let requests = server.received_requests().await.unwrap();
        let login = requests.iter().find(|r| r.url.path() == "/idp/login").unwrap();
        assert_eq!(
            login.url.query(),
            Some("username=alice&password=good&submit=Go")
        );
        let next = requests.iter().find(|r| r.url.path() == "/idp/next").unwrap();
        assert_eq!(next.url.query(), Some("ticket=1"));
    }

    #[tokio::test]
    async fn test_cross_origin_307_drops_form_body() {
        let idp = MockServer::start().await;
        let other = MockServer::start().await;
        mount_login_page(&idp).await;
        Mock::given(method("POST"))
            .and(path("/idp/login"))
            .respond_with(
                ResponseTemplate::new(307)
                    .insert_header("Location", format!("{}/collect", other.uri()).as_str()),
            )
            .expect(1)
            .mount(&idp)
            .await;
        Mock::given(method("POST"))
            .and(path("/collect"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&other)
            .await;

        client()
            .login(&idp.uri(), &Credentials::new("alice", "secret-pw"))
            .await
            .unwrap();
        let received = other.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(!body.contains("secret-pw"), "{body}");
    }

    #[tokio::test]
    async fn test_same_origin_307_replays_form_body() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/idp/login"))
            .respond_with(ResponseTemplate::new(307).insert_header("Location", "/idp/login2"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/idp/login2"))
            .and(body_string_contains("password=good"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Set-Cookie", "_shibsession_x=s1; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cookie = client()
            .acquire(&server.uri(), &Credentials::new("alice", "good"))
            .await
            .unwrap();
        assert_eq!(cookie.value, "s1");
    }

    #[tokio::test]
    async fn test_session_cleared_on_failed_login_is_not_found() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/idp/login"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", "/")
                    .insert_header("Set-Cookie", "_shibsession_x=; Path=/; Expires=Thu, 01-Jan-70 00:00:01 GMT"),
            )
            .mount(&server)
            .await;

        let err = client()
            .acquire(&server.uri(), &Credentials::new("alice", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::CookieNotFound { .. }), "{err}");
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
