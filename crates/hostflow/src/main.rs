mod app;
mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "hostflow")]
#[command(about = "Job-driven lifecycle management for CI build hosts", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "HOSTFLOW_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a host and wait for it to boot
    Provision {
        /// Host ID
        host: String,
        /// Distro name recorded on the host
        #[arg(long, default_value = "default")]
        distro: String,
        /// Cloud backend (mock, sakura-cloud)
        #[arg(long, default_value = "sakura-cloud")]
        provider: String,
        /// Machine image
        #[arg(long)]
        image: Option<String>,
        /// Instance size or plan
        #[arg(long)]
        instance_type: Option<String>,
        /// Region or zone
        #[arg(long)]
        region: Option<String>,
    },
    /// Start a stopped host
    Start {
        /// Host ID
        host: String,
    },
    /// Stop a running host
    Stop {
        /// Host ID
        host: String,
    },
    /// Take a host out of service
    Decommission {
        /// Host ID
        host: String,
    },
    /// Destroy a host's instance
    Terminate {
        /// Host ID
        host: String,
        /// Terminate even if the host was not decommissioned
        #[arg(short, long)]
        force: bool,
    },
    /// Block every job but terminate on a host
    Quarantine {
        /// Host ID
        host: String,
    },
    /// Lift a quarantine
    Unquarantine {
        /// Host ID
        host: String,
    },
    /// Repair recorded status from the provider
    Reconcile {
        /// Host ID (omit to sweep all stale hosts)
        host: Option<String>,
    },
    /// Show recorded hosts
    Status {
        /// Host ID (omit to list all)
        host: Option<String>,
    },
    /// Show a host's event history, newest first
    Events {
        /// Host ID
        host: String,
        /// Entries per page
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Page number, starting at 0
        #[arg(short, long, default_value = "0")]
        page: usize,
    },
    /// Show events not yet handed to downstream consumers
    Unprocessed {
        /// Maximum number of entries
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Mark an event as processed
    Ack {
        /// Event ID
        event_id: String,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Version needs no configuration
    if matches!(cli.command, Commands::Version) {
        println!("hostflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => hostflow_config::load_from(path)?,
        None => hostflow_config::load()?,
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let app = app::App::new(config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, rolling back in-flight work...".yellow());
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Provision {
            host,
            distro,
            provider,
            image,
            instance_type,
            region,
        } => {
            let distro = commands::provision::DistroArgs {
                name: distro,
                provider,
                image,
                instance_type,
                region,
            };
            commands::provision::handle(&app, host, distro, &cancel).await?;
        }
        Commands::Start { host } => {
            commands::lifecycle::handle(&app, "host-start", host, strict(), &cancel).await?;
        }
        Commands::Stop { host } => {
            commands::lifecycle::handle(&app, "host-stop", host, strict(), &cancel).await?;
        }
        Commands::Decommission { host } => {
            commands::lifecycle::handle(
                &app,
                "host-decommission",
                host,
                serde_json::Value::Null,
                &cancel,
            )
            .await?;
        }
        Commands::Terminate { host, force } => {
            commands::lifecycle::handle(
                &app,
                "host-terminate",
                host,
                serde_json::json!({ "force": force }),
                &cancel,
            )
            .await?;
        }
        Commands::Quarantine { host } => {
            commands::lifecycle::handle(
                &app,
                "host-quarantine",
                host,
                serde_json::json!({ "quarantined": true }),
                &cancel,
            )
            .await?;
        }
        Commands::Unquarantine { host } => {
            commands::lifecycle::handle(
                &app,
                "host-quarantine",
                host,
                serde_json::json!({ "quarantined": false }),
                &cancel,
            )
            .await?;
        }
        Commands::Reconcile { host } => {
            commands::reconcile::handle(&app, host, &cancel).await?;
        }
        Commands::Status { host } => {
            commands::status::handle(&app, host).await?;
        }
        Commands::Events { host, limit, page } => {
            commands::events::handle_history(&app, &host, limit, page).await?;
        }
        Commands::Unprocessed { limit } => {
            commands::events::handle_unprocessed(&app, limit).await?;
        }
        Commands::Ack { event_id } => {
            commands::events::handle_ack(&app, &event_id).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}

/// Operator-issued power changes fail loudly when there is nothing to do
fn strict() -> serde_json::Value {
    serde_json::json!({ "strict": true })
}
