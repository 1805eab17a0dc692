use std::path::PathBuf;

use affinity_common::{CharacterId, UserId};
use affinity_config::ConfigLoader;
use affinity_db::RecordStore;
use affinity_shim::{HttpRemoteStore, PersistenceShim, Source};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "affinity",
    version,
    about = "Affinity - local-first persistence for character chat"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the config file, then info.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Config directory (defaults to ~/.config/affinity or ~/.affinity)
    #[arg(long, global = true, env = "AFFINITY_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the record store HTTP API
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },

    /// Remove aged chat history and low-importance memories from the database
    Sweep {
        /// Keep this many days of history
        #[arg(long)]
        days: Option<u32>,

        /// Memories at or above this importance are kept regardless of age
        #[arg(long)]
        min_importance: Option<u32>,
    },

    /// Log in (creating the profile if needed) through the persistence shim
    Login {
        username: String,

        #[arg(long)]
        email: Option<String>,
    },

    /// Print chat history for a user and character
    History { user_id: i64, character: String },

    /// Check whether the configured remote store is up
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let loader = match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new()?,
    };
    loader.ensure_dirs()?;
    let config = loader.load()?;

    let log_level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }

            let server = affinity_gateway::GatewayServer::new(config)
                .with_config_dir(loader.config_dir());
            server.run().await?;
        }
        Commands::Sweep {
            days,
            min_importance,
        } => {
            let mut retention = config.retention.clone();
            if let Some(days) = days {
                retention.days_to_keep = days;
            }
            if let Some(min) = min_importance {
                retention.min_importance = min;
            }

            let db_path = config.database_path(loader.config_dir());
            let store = RecordStore::open(&db_path)
                .with_context(|| format!("opening {}", db_path.display()))?;
            let report =
                store.cleanup(retention.cutoff(chrono::Utc::now()), retention.min_importance)?;
            println!(
                "Removed {} chat entries and {} memories older than {}",
                report.chat_entries_removed,
                report.memories_removed,
                report.before.to_rfc3339()
            );
        }
        Commands::Login { username, email } => {
            let shim = PersistenceShim::from_config(&config, loader.config_dir())?;
            let profile = shim.login(&username, email.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&profile.value)?);
            println!("served by: {}", describe(profile.source));
        }
        Commands::History { user_id, character } => {
            let shim = PersistenceShim::from_config(&config, loader.config_dir())?;
            let history = shim
                .chat_history(UserId::new(user_id), &CharacterId::new(character))
                .await?;

            if history.value.is_empty() {
                println!("No chat history.");
            }
            for entry in &history.value {
                let time = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
                if let Some(input) = &entry.user_input {
                    println!("[{time}] you: {input}");
                }
                if let Some(response) = &entry.character_response {
                    println!("[{time}] {} ({}): {response}", entry.character_id, entry.emotion);
                }
            }
            println!("served by: {}", describe(history.source));
        }
        Commands::Status => {
            let base = config.remote.base_url.clone().unwrap_or_else(|| {
                format!("http://{}:{}", config.gateway.host, config.gateway.port)
            });
            info!("checking {base}");

            let remote = HttpRemoteStore::new(&base, config.remote.timeout())?;
            match remote.health().await {
                Ok(()) => println!("Remote store at {base} is up."),
                Err(e) if e.is_transient() => println!(
                    "Remote store at {base} is not reachable; clients will use local storage. ({e})"
                ),
                Err(e) => println!("Remote store at {base} refused the health check: {e}"),
            }
        }
    }

    Ok(())
}

fn describe(source: Source) -> &'static str {
    match source {
        Source::Remote => "remote store",
        Source::LocalOnly => "local storage (remote unavailable)",
    }
}
