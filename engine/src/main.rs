// Neko assistant engine
// Main entry point for the neko binary

use clap::Parser;
use neko_engine::cli::{Cli, Command, ConfigAction};
use neko_engine::config::Config;
use neko_engine::handlers::{
    handle_chat, handle_config_path, handle_config_show, handle_run, OutputFormat,
};
use neko_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Basic telemetry first, before config is loaded
    init_telemetry();

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::info!("Neko Engine v{} ({} - {})", version, commit, timestamp);

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize with the configured level; --log wins over config,
    // RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Chat => handle_chat(&config).await,
        Command::Run { utterance } => handle_run(&config, &utterance, format).await,
        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(),
        },
    }
}
