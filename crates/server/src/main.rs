//! LANVan upload daemon.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use lanvan_core::config::AppConfig;
use lanvan_server::{AppState, create_router};
use lanvan_upload::{Environment, UploadCoordinator};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// LANVan - receive files over the local network
#[derive(Parser, Debug)]
#[command(name = "lanvand")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LANVAN_CONFIG",
        default_value = "config/lanvan.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("LANVan v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; defaults plus LANVAN_* variables are a complete config.
    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("LANVAN_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    lanvan_upload::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let env = Environment::for_app(&config);
    let coordinator = UploadCoordinator::new(&config, env)
        .await
        .context("failed to initialize upload coordinator")?;
    coordinator
        .directory()
        .health_check()
        .await
        .context("upload directory health check failed")?;
    tracing::info!(
        upload_dir = %config.upload.upload_dir.display(),
        max_concurrent_uploads = config.upload.max_concurrent_uploads,
        "Upload directory ready"
    );

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let app = create_router(AppState::new(config, coordinator));

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
