mod cli;
mod core;
mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::output::{detect_color, OutputFormat, OutputOptions};
use crate::core::collectors;
use crate::core::config::AppConfig;
use crate::core::monitor::UsageMonitor;
use crate::core::store::SnapshotStore;

#[derive(Parser)]
#[command(name = "aum", about = "Local AI assistant usage monitor", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output format (text|json)
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Shorthand for --format json
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite snapshot store to use instead of the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and dashboard (default)
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show the cached summary for every service
    Summary,
    /// Show usage for one service
    Usage {
        /// Service id (claude|codex|antigravity)
        service: String,
    },
    /// Re-scan every service and show the fresh summary
    Refresh,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate default config file
    Init,
    /// Validate config file
    Check,
    /// Print the config file path
    Path,
}

fn setup_logging(verbose: bool, serving: bool) {
    let default = match (verbose, serving) {
        (true, _) => "aum=debug",
        (false, true) => "aum=info",
        (false, false) => "aum=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn build_monitor(config: &AppConfig) -> anyhow::Result<UsageMonitor> {
    let path = config.store_path();
    let store = SnapshotStore::open(&path)
        .with_context(|| format!("Failed to open snapshot store at {}", path.display()))?;
    Ok(UsageMonitor::new(store, collectors::from_config(config)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let serving = matches!(cli.command, None | Some(Commands::Serve { .. }));
    setup_logging(cli.verbose, serving);

    let mut config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("{}; using defaults", e);
            AppConfig::default()
        }
    };
    if let Some(db) = cli.db {
        config.store.path = Some(db);
    }

    let output_opts = OutputOptions {
        format: OutputFormat::resolve(cli.json, cli.format.as_deref(), &config.settings),
        pretty: cli.pretty,
        use_color: detect_color(!cli.no_color, &config.settings),
        verbose: cli.verbose,
    };

    match cli.command {
        None | Some(Commands::Serve { .. }) => {
            let (host, port) = match cli.command {
                Some(Commands::Serve { host, port }) => (host, port),
                _ => (None, None),
            };
            let options = server::ServeOptions {
                host: host.unwrap_or_else(|| config.server.host.clone()),
                port: port.unwrap_or(config.server.port),
                refresh_on_start: config.server.refresh_on_start,
            };
            let monitor = Arc::new(build_monitor(&config)?);
            server::serve(options, monitor.clone()).await?;
            if let Ok(monitor) = Arc::try_unwrap(monitor) {
                monitor.close()?;
            }
        }
        Some(Commands::Summary) => {
            let monitor = build_monitor(&config)?;
            cli::usage_cmd::summary(&monitor, &output_opts).await?;
            monitor.close()?;
        }
        Some(Commands::Usage { service }) => {
            let monitor = build_monitor(&config)?;
            cli::usage_cmd::usage(&monitor, &service, &output_opts).await?;
            monitor.close()?;
        }
        Some(Commands::Refresh) => {
            let monitor = build_monitor(&config)?;
            cli::usage_cmd::refresh(&monitor, &output_opts).await?;
            monitor.close()?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => cli::config_cmd::init(&output_opts)?,
            ConfigAction::Check => cli::config_cmd::check(&output_opts)?,
            ConfigAction::Path => cli::config_cmd::path(&output_opts)?,
        },
    }

    Ok(())
}
