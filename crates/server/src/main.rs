//! Coldstore server binary.

use clap::Parser;
use coldstore_core::ErrorKind;
use coldstore_core::config::AppConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Coldstore - hierarchical storage management server
#[derive(Parser, Debug)]
#[command(name = "coldstored")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "COLDSTORE_CONFIG",
        default_value = "/etc/coldstore/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        figment = figment.merge(Toml::file(&args.config));
    }
    let config: AppConfig = match figment
        .merge(Env::prefixed("COLDSTORE_").split("__"))
        .extract()
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("coldstored: failed to load configuration: {e}");
            std::process::exit(ErrorKind::Config.exit_code());
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("coldstored v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = coldstore_server::supervisor::run(config).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(e.kind().exit_code());
    }
}
