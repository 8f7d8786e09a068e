use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muxloop::{ClosedConnection, Config, EventLoop};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "muxloop")]
#[command(about = "Single-threaded readiness-based TCP client and server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to every host, send the request and print what comes back
    Client {
        /// Remote port
        #[arg(short, long, default_value_t = 9527)]
        port: u16,

        /// Hosts to connect to
        #[arg(default_values_t = [String::from("localhost"), String::from("127.0.0.1")])]
        hosts: Vec<String>,
    },

    /// Accept connections, write the response and print what comes back
    Server {
        /// Listen port
        #[arg(short, long, default_value_t = 9527)]
        port: u16,

        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: IpAddr,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Client { port, hosts } => run_client(config, port, &hosts),
        Commands::Server { port, bind } => run_server(config, SocketAddr::new(bind, port)),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("muxloop={}", level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .compact(),
        )
        .try_init()
        .context("Failed to install the log subscriber")?;

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let mut config = Config::default();
            config
                .apply_env_overrides(|key| std::env::var(key).ok())
                .context("Invalid environment override")?;
            config.validate().context("Invalid configuration")?;
            Ok(config)
        }
    }
}

fn run_client(config: Config, port: u16, hosts: &[String]) -> Result<()> {
    let mut event_loop = EventLoop::new(config).context("Failed to create event loop")?;

    for host in hosts {
        if let Err(err) = event_loop.open(host, port) {
            warn!(host, port, error = %err, "could not start connection");
        }
    }

    let closed = event_loop.run().context("Event loop failed")?;
    closed.iter().for_each(report);

    Ok(())
}

fn run_server(config: Config, addr: SocketAddr) -> Result<()> {
    let mut event_loop = EventLoop::new(config).context("Failed to create event loop")?;

    let local = event_loop
        .bind(addr)
        .with_context(|| format!("Failed to listen on {addr}"))?;
    info!(addr = %local, "server ready");

    // Report each connection as it closes; nothing is kept across accepts.
    event_loop.on_close(|closed| report(&closed));
    event_loop.run().context("Event loop failed")?;

    Ok(())
}

fn report(connection: &ClosedConnection) {
    let target = connection
        .host
        .clone()
        .or_else(|| connection.peer.map(|peer| peer.to_string()))
        .unwrap_or_else(|| String::from("?"));

    match connection.error() {
        None if connection.is_success() => println!(
            "{} {}: ok, {} bytes received",
            connection.id,
            target,
            connection.received.len()
        ),
        None => println!("{} {}: {:?}", connection.id, target, connection.reason),
        Some(err) => println!("{} {}: failed: {}", connection.id, target, err),
    }
}
