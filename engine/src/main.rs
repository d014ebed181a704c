// Kestrel autonomous agent
// Main entry point for the kestrel binary

use clap::Parser;
use kestrel_engine::cli::{Cli, Command};
use kestrel_engine::config::Config;
use kestrel_engine::daemon;
use kestrel_engine::handlers::{
    handle_consolidate, handle_context, handle_memory, handle_status, handle_steer, handle_stop,
    handle_usage, handle_watch, OutputFormat,
};
use kestrel_engine::telemetry::{init_cli_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from_flag(cli.json);

    let config = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path)?,
        None => Config::load_or_create()?,
    };

    // RUST_LOG wins over both inside the telemetry setup
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);

    if matches!(cli.command, Command::Start) {
        init_telemetry_with_level(log_level);
        tracing::info!(
            "Kestrel v{} ({} - {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_COMMIT_HASH"),
            env!("BUILD_TIMESTAMP")
        );
    } else {
        init_cli_telemetry(log_level);
    }

    match cli.command {
        Command::Start => daemon::run_agent(&config).await,
        Command::Stop => handle_stop(&config, format).await,
        Command::Status => handle_status(&config, format).await,
        Command::Watch => handle_watch(&config, format).await,
        Command::Steer { action } => handle_steer(action, &config, format).await,
        Command::Memory { limit } => handle_memory(limit, &config, format).await,
        Command::Context => handle_context(&config, format).await,
        Command::Usage => handle_usage(&config, format).await,
        Command::Consolidate => handle_consolidate(&config, format).await,
    }
}
