//! `rtds` - command-line client for an RTDS server.
//!
//! Thin wrapper over the `rtds_client` library: resolves the endpoint from
//! flags and config, opens a WebSocket transport and runs one command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rtds_client::transport::ws::WsConnector;
use rtds_client::{listener, session, Client, Config, EndpointOptions, Subscription};
use serde_json::Value;

/// How long a command waits for a correlated reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);
/// How long `send` waits for its frame to be written.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

// CLI
#[derive(Parser)]
#[command(name = "rtds")]
#[command(version)]
#[command(about = "Session and subscription client for an RTDS server")]
struct Cli {
    /// Server URL (overrides config)
    #[arg(long, global = true, conflicts_with = "port")]
    url: Option<String>,

    /// Server port on the configured origin (overrides config)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        /// User name
        #[arg(long)]
        user: String,
        /// Password (falls back to RTDS_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },
    /// End the stored session
    Logout,
    /// Show endpoint and session state
    Status,
    /// Subscribe to a channel and print every message until Ctrl-C
    Watch {
        /// Channel name
        channel: String,
        /// Filter object, as JSON
        #[arg(long)]
        filter: Option<String>,
    },
    /// Send one message
    Send {
        /// Message type
        msg_type: String,
        /// Payload, as JSON (defaults to `{}`)
        data: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let endpoint = match (cli.url, cli.port) {
        (Some(url), _) => EndpointOptions::url(url),
        (None, Some(port)) => EndpointOptions::port(port),
        (None, None) => config.endpoint(),
    };

    let client = Client::builder(Arc::new(WsConnector::new()))
        .store(session::default_store()?)
        .origin(config.origin_url()?)
        .build();

    match cli.command {
        Commands::Status => {
            let url = endpoint.resolve(&config.origin_url()?)?;
            println!("Endpoint: {url}");
            match client.session() {
                Some(session) => println!("Logged in as {}", session.user),
                None => println!("Not logged in"),
            }
        }
        Commands::Login { user, password } => {
            let password = match password {
                Some(password) => password,
                None => std::env::var("RTDS_PASSWORD")
                    .context("No password given (use --password or RTDS_PASSWORD)")?,
            };
            client.configure(&endpoint)?;
            let reply = tokio::time::timeout(REPLY_TIMEOUT, client.login(&user, &password))
                .await
                .context("Timed out waiting for login reply")??;
            println!("Logged in as {}", reply.get("user").unwrap_or(&Value::Null));
        }
        Commands::Logout => {
            if !client.is_logged_in() {
                println!("Not logged in");
                return Ok(());
            }
            client.configure(&endpoint)?;
            tokio::time::timeout(REPLY_TIMEOUT, client.logout())
                .await
                .context("Timed out waiting for logout reply")??;
            println!("Logged out");
        }
        Commands::Watch { channel, filter } => {
            let sub = match filter {
                Some(filter) => Subscription::filtered(channel, parse_json(&filter)?),
                None => Subscription::channel(channel),
            };
            client.configure(&endpoint)?;
            let _watch = client.watch(sub, listener(|payload| println!("{payload}")))?;
            tokio::signal::ctrl_c()
                .await
                .context("Failed to wait for Ctrl-C")?;
        }
        Commands::Send { msg_type, data } => {
            let data = match data {
                Some(data) => parse_json(&data)?,
                None => Value::Object(serde_json::Map::new()),
            };
            client.configure(&endpoint)?;
            client.send(&msg_type, data)?;
            client
                .flush(FLUSH_TIMEOUT)
                .await
                .with_context(|| format!("'{msg_type}' was not delivered"))?;
        }
    }

    Ok(())
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("Invalid JSON: {text}"))
}
