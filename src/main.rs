//! Ban Sync CLI.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_ban_sync::firewall::cloudflare::CloudflareClient;
use zentinel_ban_sync::server::{router, AppState};
use zentinel_ban_sync::{BanSyncService, Config, DomainResolver};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "zentinel-ban-sync")]
#[command(about = "Ban sync service for Zentinel - keep a Cloudflare firewall rule in step with fail2ban")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ban-sync.yaml")]
    config: PathBuf,

    /// Listen address, overrides server.listen
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let client = CloudflareClient::new(&config.cloudflare)?;
    let rule_name = config.settings.effective_rule_name().to_string();
    let allowed_domains = config.settings.allowed_domains.clone();
    let caller = config.caller.clone();
    let listen = args.listen.unwrap_or(config.server.listen);

    let resolver = DomainResolver::new(&allowed_domains, Arc::new(config));
    info!(
        domains = resolver.allowed_domains().len(),
        rule_name = %rule_name,
        "Ban sync initialized"
    );

    let service = BanSyncService::new(resolver, Arc::new(client), rule_name);
    let app = router(Arc::new(AppState::new(service, caller)));

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(address = %listen, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
