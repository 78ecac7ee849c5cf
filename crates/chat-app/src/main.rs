use std::path::PathBuf;

use clap::Parser;
use parley::app::{AppError, ChatApp, ConfigurationSnafu, build_providers};
use parley::settings::{AppSettings, OnMissingCredential};
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

/// Chat with a hosted model; ask it to draw something and it generates an image.
#[derive(Debug, Parser)]
#[command(name = "parley", version)]
struct Cli {
    /// JSON settings file. Defaults to the user config directory.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Chat model for this session.
    #[arg(long, value_name = "ID")]
    model: Option<String>,

    /// Turn off `/upload`.
    #[arg(long)]
    no_upload: bool,

    /// Keep running without an API key; every request fails with a notice.
    #[arg(long)]
    allow_missing_key: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load .env before the subscriber so RUST_LOG set there takes effect.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match dotenv {
        Ok(path) => tracing::info!("loaded environment from {:?}", path),
        Err(error) if error.not_found() => {}
        Err(error) => tracing::warn!("failed to load .env file: {}", error),
    }

    let cli = Cli::parse();
    let loaded = match &cli.config {
        Some(config_path) => AppSettings::load(config_path),
        None => AppSettings::load_or_defaults(&AppSettings::default_config_path()),
    };
    let mut settings = loaded.context(ConfigurationSnafu {
        stage: "load-settings",
    })?;

    if let Some(model) = cli.model {
        settings.chat_model = model;
    }
    if cli.no_upload {
        settings.support_image_upload = false;
    }
    if cli.allow_missing_key {
        settings.on_missing_credential = OnMissingCredential::WarnAndContinue;
    }
    let settings = settings.normalized();

    let providers = build_providers(&settings, |name| std::env::var(name).ok())?;
    let mut app = ChatApp::new(settings, providers);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    app.run(stdin, std::io::stdout()).await
}
