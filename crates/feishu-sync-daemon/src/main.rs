//! feishu-sync: keep a Feishu wiki space and a local Markdown tree in
//! bidirectional sync.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use feishu_sync_daemon::config::{expand_tilde, Config};
use feishu_sync_daemon::{orchestrator, supervisor};
use feishu_sync_daemon::supervisor::Worker;

use feishu_sync_core::{reconcile, FeishuClient, ReconcileOptions};

#[derive(Parser, Debug)]
#[command(name = "feishu-sync")]
#[command(about = "Bidirectional wiki <-> Markdown sync")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "~/.feishu-sync/config.json")]
    config: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Spawn the detached auth and sync workers
    Start,
    /// Stop the background workers
    Stop,
    /// Show worker status
    Status,
    /// Run the sync daemon in the foreground
    Run,
    /// Run one reconciliation pass and exit
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "debug,feishu_sync_daemon=debug,feishu_sync_core=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = expand_tilde(&cli.config);

    match cli.command {
        CliCommand::Start => {
            // Config problems should surface here, not in the detached log.
            let config = Config::load(&config_path)?;
            if config.auth.client_id.is_some() && config.auth.client_secret.is_some() {
                if let Err(e) = supervisor::start(Worker::Auth, &config_path) {
                    tracing::warn!("Auth worker not started: {e}");
                }
            }
            supervisor::start(Worker::Sync, &config_path)?;
            Ok(())
        }
        CliCommand::Stop => {
            supervisor::stop(Worker::Sync)?;
            supervisor::stop(Worker::Auth)?;
            Ok(())
        }
        CliCommand::Status => {
            supervisor::status(Worker::Sync)?;
            supervisor::status(Worker::Auth)?;
            Ok(())
        }
        CliCommand::Run => {
            let config = Config::load(&config_path)?;
            let _lock = supervisor::RunLock::acquire()?;
            orchestrator::run(config).await
        }
        CliCommand::Sync => {
            let config = Config::load(&config_path)?;
            let token = config.read_token()?;
            let root_dir = config.root_dir();
            std::fs::create_dir_all(&root_dir)?;

            let client = FeishuClient::new(token);
            let report = reconcile(
                &client,
                &config.wiki_space_id,
                &root_dir,
                &ReconcileOptions::default(),
            )
            .await?;
            info!("Reconciliation finished");
            println!("{report}");
            Ok(())
        }
    }
}
