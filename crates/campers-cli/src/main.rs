mod cli;
mod commands;
mod output;

use std::sync::Arc;

use campers_config::CliOverrides;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Console logging plus a persistent file under `$CAMPERS_DIR/logs/`.
fn init_logging() {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let logs_dir = campers_domain::paths::logs_dir();
    let file_layer = std::fs::create_dir_all(&logs_dir)
        .ok()
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(logs_dir.join("campers.log"))
                .ok()
        })
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
        });

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();

    let code = match cli.command {
        Command::Init { force } => commands::init(force),
        Command::Setup => commands::setup().await,
        Command::Doctor => commands::doctor().await,
        Command::Run {
            camp,
            instance_type,
            region,
            disk_size,
            command,
            port,
            ignore,
            include_vcs,
        } => {
            let overrides = CliOverrides {
                region,
                instance_type,
                disk_size,
                command,
                ports: port,
                ignore,
                include_vcs,
            };
            commands::run(camp, overrides).await
        }
        Command::List { region } => commands::list(region).await,
        Command::Info { name_or_id, region } => commands::info(name_or_id, region).await,
        Command::Stop { name_or_id, region } => commands::stop(name_or_id, region).await,
        Command::Start { name_or_id, region } => commands::start(name_or_id, region).await,
        Command::Destroy { name_or_id, region } => commands::destroy(name_or_id, region).await,
    };

    std::process::exit(code);
}
