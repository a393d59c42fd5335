//! Configuration schema for Janus.
//!
//! YAML config: transport (timeouts, TLS scoping), login form, protected service,
//! static credentials, delegated endpoint. Env vars are expanded before parsing.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// Root config (janus.yaml). Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub login: LoginConfig,

    #[serde(default)]
    pub service: Option<ServiceConfig>,

    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Log level (e.g. "info", "debug"). Env JANUS_LOG_LEVEL overrides when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty". Env JANUS_LOG_FORMAT overrides.
    #[serde(default)]
    pub log_format: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Hosts (exact, case-insensitive) reached with certificate and hostname checks disabled.
    #[serde(default)]
    pub insecure_tls_hosts: Vec<String>,
    /// Disable TLS verification for every host. Logged loudly at startup.
    #[serde(default)]
    pub insecure_tls_all: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            insecure_tls_hosts: Vec::new(),
            insecure_tls_all: false,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}

/// How the IdP login page is driven and how the session cookie is recognized.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginConfig {
    #[serde(default = "default_session_cookie_prefix")]
    pub session_cookie_prefix: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    #[serde(default = "default_submit_field")]
    pub submit_field: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    /// Max SAML POST-binding pages submitted on the browser's behalf after the login form.
    #[serde(default = "default_max_auto_submits")]
    pub max_auto_submits: u32,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            session_cookie_prefix: default_session_cookie_prefix(),
            username_field: default_username_field(),
            password_field: default_password_field(),
            submit_field: default_submit_field(),
            max_redirects: default_max_redirects(),
            max_auto_submits: default_max_auto_submits(),
        }
    }
}

fn default_session_cookie_prefix() -> String {
    crate::session::DEFAULT_SESSION_PREFIX.to_string()
}
fn default_username_field() -> String {
    "username".to_string()
}
fn default_password_field() -> String {
    "password".to_string()
}
fn default_submit_field() -> String {
    "submit".to_string()
}
fn default_max_redirects() -> u32 {
    10
}
fn default_max_auto_submits() -> u32 {
    3
}

/// Protected web service called by `janus call`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub base_address: String,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_accept")]
    pub accept: String,
}

fn default_accept() -> String {
    "text/xml".to_string()
}

/// Static credentials for the CLI harness. Each value: file, then env, then literal.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub username_env: Option<String>,
    #[serde(default)]
    pub username_file: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub password_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Realm advertised in the `WWW-Authenticate: Basic` challenge.
    #[serde(default = "default_realm")]
    pub realm: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            port: default_server_port(),
            realm: default_realm(),
        }
    }
}

fn default_server_address() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    8080
}
fn default_realm() -> String {
    "janus".to_string()
}

/// Resolve a secret from file path, environment variable, or literal, in that order.
pub fn read_secret(
    file_path: Option<&str>,
    env_var: Option<&str>,
    literal: Option<&str>,
) -> anyhow::Result<Option<String>> {
    if let Some(p) = file_path.filter(|p| !p.is_empty()) {
        let s = std::fs::read_to_string(Path::new(p))
            .with_context(|| format!("read secret file {:?}", p))?;
        return Ok(Some(s.trim().to_string()));
    }
    if let Some(var) = env_var.filter(|v| !v.is_empty()) {
        let v = std::env::var(var).with_context(|| format!("env {} not set", var))?;
        return Ok(Some(v));
    }
    Ok(literal.map(str::to_string))
}

impl Config {
    /// Load and parse config from path. Expands env vars (`$VAR`, `${VAR}`, `${VAR:-default}`) via shellexpand.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {:?}: {}", path, e))?;
        Self::parse(&s)
    }

    /// Like [`Config::load`], but a missing file yields the built-in defaults unless `required`.
    pub fn load_or_default(path: &Path, required: bool) -> anyhow::Result<Self> {
        if !required && !path.exists() {
            return Ok(Config::default());
        }
        Self::load(path)
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(s)?;
        let config: Config = serde_yaml_ng::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.login.session_cookie_prefix.is_empty() {
            anyhow::bail!("login.session_cookie_prefix must not be empty");
        }
        if let Some(service) = &self.service {
            reqwest::Url::parse(&service.base_address)
                .with_context(|| format!("service.base_address {:?}", service.base_address))?;
        }
        Ok(())
    }
}

/// Expand env vars in config: `$VAR`, `${VAR}`, `${VAR:-default}`. Unset vars expand to empty.
fn expand_env_vars(s: &str) -> anyhow::Result<String> {
    fn context(var: &str) -> Result<Option<std::borrow::Cow<'static, str>>, std::env::VarError> {
        match std::env::var(var) {
            Ok(v) => Ok(Some(v.into())),
            Err(std::env::VarError::NotPresent) => Ok(Some("".into())),
            Err(e) => Err(e),
        }
    }
    shellexpand::env_with_context(s, context)
        .map(|cow| cow.into_owned())
        .map_err(|e| anyhow::anyhow!("config env expansion: {} ({})", e.var_name, e.cause))
}
