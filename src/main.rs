//! Janus — Shibboleth session cookie helper.
//!
//! Logs in to a SAML/Shibboleth IdP through its HTML login form, extracts the session
//! cookie, and calls cookie-protected web services with it, logging in again when the
//! session has expired. Also serves the cookie to other clients over HTTP Basic.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use janus_cookie::caller::{ResourceDescriptor, ServiceCaller};
use janus_cookie::client::Transport;
use janus_cookie::config::Config;
use janus_cookie::credentials::{CredentialSource, StaticCredentials};
use janus_cookie::login::LoginClient;
use janus_cookie::server;
use janus_cookie::session::SessionCookie;

const DEFAULT_CONFIG: &str = "janus.yaml";

#[derive(Parser)]
#[command(name = "janus")]
#[command(author, version, about = "Shibboleth session cookie helper")]
struct Cli {
    /// Config file path (missing default file means built-in defaults)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with the configured credentials and print the session cookie line
    Cookie {
        /// Service URL; the login page is fetched from its host root
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },

    /// Call the protected service, logging in again once if the session expired
    Call {
        /// Service base address (overrides service.base_address)
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Sub-path under the base address (overrides service.path)
        #[arg(long, value_name = "PATH")]
        path: Option<String>,

        /// Reuse a cookie line printed by `janus cookie` instead of logging in first
        #[arg(long, value_name = "LINE")]
        cookie: Option<String>,
    },

    /// Serve GET /cookie?url=... for clients sending HTTP Basic credentials
    Serve {
        #[arg(long, value_name = "ADDR")]
        address: Option<String>,

        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config_path, required) = match &cli.config {
        Some(p) => (p.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };

    if let Commands::Validate = cli.command {
        init_logging(None, &cli);
        return run_validate(&config_path);
    }

    let config = Config::load_or_default(&config_path, required)?;
    init_logging(Some(&config), &cli);

    match &cli.command {
        Commands::Cookie { url } => run_cookie(&config, url.as_deref()).await,
        Commands::Call { url, path, cookie } => {
            run_call(&config, url.as_deref(), path.as_deref(), cookie.as_deref()).await
        }
        Commands::Serve { address, port } => {
            run_serve(&config, address.as_deref(), *port).await
        }
        Commands::Validate => unreachable!(),
    }
}

/// Init tracing from config (log_format, log_level) or env. Env JANUS_LOG_FORMAT, JANUS_LOG_LEVEL
/// (or RUST_LOG when no config) override.
fn init_logging(config: Option<&Config>, cli: &Cli) {
    let use_json = match config.and_then(|c| c.global.log_format.as_deref()) {
        Some("json") => true,
        _ => std::env::var("JANUS_LOG_FORMAT").as_deref() == Ok("json"),
    };
    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else if cli.verbose {
        EnvFilter::new("janus=debug")
    } else {
        let level = std::env::var("JANUS_LOG_LEVEL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| config.map(|c| c.global.log_level.clone()));
        match level {
            Some(level) => EnvFilter::new(format!("janus={}", level)),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("janus=info")),
        }
    };
    if use_json {
        let json_fmt = tracing_subscriber::fmt::format()
            .json()
            .with_current_span(false)
            .with_span_list(false);
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .event_format(json_fmt),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
    }
}

fn run_validate(config_path: &std::path::Path) -> anyhow::Result<()> {
    match Config::load(config_path) {
        Ok(_) => {
            tracing::info!("config valid");
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!("config invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn static_credentials(config: &Config) -> anyhow::Result<StaticCredentials> {
    let creds = config
        .credentials
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("credentials section required for this command"))?;
    StaticCredentials::from_config(creds)
}

fn login_client(config: &Config) -> anyhow::Result<(Transport, LoginClient)> {
    let transport = Transport::from_config(&config.transport)?;
    let login = LoginClient::new(transport.clone(), &config.login);
    Ok((transport, login))
}

async fn run_cookie(config: &Config, url: Option<&str>) -> anyhow::Result<()> {
    let url = url
        .map(str::to_string)
        .or_else(|| config.service.as_ref().map(|s| s.base_address.clone()))
        .ok_or_else(|| anyhow::anyhow!("--url or service.base_address required"))?;
    let credentials = static_credentials(config)?.credentials()?;
    let (_, login) = login_client(config)?;
    let cookie = login.acquire(&url, &credentials).await?;
    println!("{}", cookie.to_line());
    Ok(())
}

async fn run_call(
    config: &Config,
    url: Option<&str>,
    path: Option<&str>,
    cookie_line: Option<&str>,
) -> anyhow::Result<()> {
    let service = config.service.as_ref();
    let base_address = url
        .map(str::to_string)
        .or_else(|| service.map(|s| s.base_address.clone()))
        .ok_or_else(|| anyhow::anyhow!("--url or service.base_address required"))?;
    let sub_path = path
        .map(str::to_string)
        .or_else(|| service.map(|s| s.path.clone()))
        .unwrap_or_default();
    let accept = service
        .map(|s| s.accept.clone())
        .unwrap_or_else(|| "text/xml".to_string());
    let session = cookie_line.map(SessionCookie::from_line).transpose()?;

    let (transport, login) = login_client(config)?;
    let credentials = static_credentials(config)?;
    let resource = ResourceDescriptor::new(base_address, sub_path);
    let mut caller =
        ServiceCaller::new(login, transport, credentials, session.clone()).with_accept(accept);

    let body = caller.call(&resource).await?;
    let (requests, logins) = caller.counters();
    tracing::debug!(requests, logins, "call finished");
    if let Some(current) = caller.session() {
        if session.as_ref() != Some(current) {
            tracing::info!(name = %current.name, "new session cookie");
            eprintln!("{}", current.to_line());
        }
    }
    println!("{}", body);
    Ok(())
}

async fn run_serve(config: &Config, address: Option<&str>, port: Option<u16>) -> anyhow::Result<()> {
    let (_, login) = login_client(config)?;
    let address = address.unwrap_or(&config.server.address);
    let port = port.unwrap_or(config.server.port);
    let listener = tokio::net::TcpListener::bind((address, port)).await?;
    let state = Arc::new(server::AppState {
        login,
        realm: config.server.realm.clone(),
        started_at: Instant::now(),
    });
    server::serve(listener, state).await
}
