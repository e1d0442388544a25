//! Subpulse CLI Entry Point
//!
//! This is the main binary entry point for Subpulse.
//! It provides five subcommands:
//! - `serve` - Run the analytics server
//! - `tools` - List the operations a server publishes
//! - `call` - Invoke one operation with JSON arguments
//! - `ask` - Ask a free-text question
//! - `configure` - Save client settings to the user profile
//!
//! Client commands print one JSON envelope to stdout. Logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use subpulse::config::{load_profile, profile_path, save_profile};
use subpulse::{
    AnalyticsError, ClientConfig, ErrorEnvelope, Metadata, Server, ServerConfig, Session, SuccessEnvelope,
    WsTransport,
};

/// Subpulse - subscription analytics over an authenticated WebSocket link
#[derive(Parser)]
#[command(name = "subpulse")]
#[command(about = "Subscription analytics server and client with natural-language routing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analytics server (configured through MCP_*, DB_* and ANALYTICS_API_KEY*)
    Serve {
        /// Override MCP_HOST
        #[arg(long)]
        host: Option<String>,

        /// Override MCP_PORT
        #[arg(long)]
        port: Option<u16>,
    },

    /// List the operations the server publishes
    Tools,

    /// Invoke one operation
    Call {
        /// Operation name, e.g. get_subscription_summary
        name: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Ask a free-text question, e.g. `subpulse ask compare 7 days vs 30 days`
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Save client settings to the user profile
    Configure {
        /// Server URL (ws:// or wss://)
        #[arg(long)]
        url: Option<String>,

        /// API key presented during the handshake
        #[arg(long)]
        api_key: Option<String>,

        /// Connect and call timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Total connect attempts
        #[arg(long)]
        retries: Option<u32>,

        /// Keep-alive ping interval in seconds
        #[arg(long)]
        ping_interval: Option<u64>,
    },
}

/// Commands that talk to a running server
enum Remote {
    Tools,
    Call { name: String, arguments: Map<String, Value> },
    Ask { query: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => match serve(host, port).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("{e:#}");
                ExitCode::FAILURE
            }
        },
        Commands::Configure { url, api_key, timeout, retries, ping_interval } => {
            let started = Instant::now();
            let outcome = configure(url, api_key, timeout, retries, ping_interval);
            emit("configure", started, None, outcome)
        }
        Commands::Tools => run_remote("tools", Remote::Tools).await,
        Commands::Call { name, args } => match parse_arguments(&args) {
            Ok(arguments) => run_remote("call", Remote::Call { name, arguments }).await,
            Err(err) => emit("call", Instant::now(), None, Err(err)),
        },
        Commands::Ask { query } => run_remote("ask", Remote::Ask { query: query.join(" ") }).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_default().to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(feature = "mysql")]
async fn serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    use subpulse::engine::mysql::MySqlBackend;

    let mut config = ServerConfig::from_env().context("invalid server configuration")?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;

    let backend = Arc::new(MySqlBackend::new(&config.database));
    let server = Server::new(backend, config.credentials).with_auth_timeout(config.auth_timeout);

    tokio::select! {
        () = server.serve(listener) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("could not listen for shutdown signal")?;
            tracing::info!("shutting down");
        }
    }
    Ok(())
}

#[cfg(not(feature = "mysql"))]
async fn serve(_host: Option<String>, _port: Option<u16>) -> anyhow::Result<()> {
    anyhow::bail!("this build has no data backend; rebuild with the `mysql` feature")
}

fn parse_arguments(raw: &str) -> subpulse::Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(_) => Err(AnalyticsError::validation("--args must be a JSON object")),
        Err(e) => Err(AnalyticsError::validation(format!("--args is not valid JSON: {e}"))),
    }
}

fn configure(
    url: Option<String>,
    api_key: Option<String>,
    timeout: Option<u64>,
    retries: Option<u32>,
    ping_interval: Option<u64>,
) -> subpulse::Result<Value> {
    let path = profile_path()?;
    let mut profile = load_profile(&path)?;

    if url.is_some() {
        profile.server_url = url;
    }
    if api_key.is_some() {
        profile.api_key = api_key;
    }
    if timeout.is_some() {
        profile.timeout_secs = timeout;
    }
    if retries.is_some() {
        profile.retry_attempts = retries;
    }
    if ping_interval.is_some() {
        profile.ping_interval_secs = ping_interval;
    }

    // reject a profile that would not load
    ClientConfig::from_sources(&profile, |_| None)?;
    save_profile(&path, &profile)?;

    Ok(serde_json::json!({ "profile": path.display().to_string() }))
}

async fn run_remote(command: &str, remote: Remote) -> ExitCode {
    let started = Instant::now();

    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(err) => return emit(command, started, None, Err(err)),
    };
    let outcome = execute_remote(&config, remote).await;
    emit(command, started, Some(config.server_url), outcome)
}

async fn execute_remote(config: &ClientConfig, remote: Remote) -> subpulse::Result<Value> {
    let session = Session::establish(
        WsTransport,
        config.server_url.as_str(),
        config.require_api_key()?,
        config.session_options(),
    )
    .await?;

    let outcome = match remote {
        Remote::Tools => session.list_tools().await.map(Value::Array),
        Remote::Call { name, arguments } => session.call(&name, arguments).await,
        Remote::Ask { query } => session.natural_language_query(&query).await,
    };

    session.close().await;
    outcome
}

/// Print one envelope and pick the exit code
fn emit(command: &str, started: Instant, endpoint: Option<String>, outcome: subpulse::Result<Value>) -> ExitCode {
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (json, code) = match outcome {
        Ok(data) => {
            let meta = match endpoint {
                Some(endpoint) => Metadata::with_endpoint(elapsed, endpoint),
                None => Metadata::new(elapsed),
            };
            (serde_json::to_string(&SuccessEnvelope::new(command, data, meta)), ExitCode::SUCCESS)
        }
        Err(err) => (serde_json::to_string(&ErrorEnvelope::from_error(command, &err)), ExitCode::FAILURE),
    };

    match json {
        Ok(json) => {
            println!("{json}");
            code
        }
        Err(e) => {
            tracing::error!("Could not encode output: {}", e);
            ExitCode::FAILURE
        }
    }
}
