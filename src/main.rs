use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use turnstile::client::ClientIdentifier;
use turnstile::config::TurnstileConfig;
use turnstile::http::{decision_routes, HttpServer};
use turnstile::ratelimit::{
    create_store, BurstProtection, CleanupTask, Clock, PolicyResolver, PolicyTable, RateLimiter,
    RateLimiterBackend, SystemClock,
};

/// Request rate limiting service.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Settings file (YAML)
    #[arg(long)]
    config: Option<String>,

    /// Policy table file (YAML); overrides `rate_limiting.policy_path`
    #[arg(long)]
    policy: Option<String>,

    /// Deployment environment; overrides `rate_limiting.environment`
    #[arg(long)]
    environment: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Turnstile Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(policy) = args.policy {
        config.rate_limiting.policy_path = Some(policy);
    }
    if let Some(environment) = args.environment {
        config.rate_limiting.environment = environment;
    }
    let settings = &config.rate_limiting;
    info!(
        http_addr = %config.server.http_addr,
        environment = %settings.environment,
        store = ?settings.store,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let identifier = ClientIdentifier::new().with_trusted_proxies_only(settings.trusted_proxies_only);
    let new_store = || create_store(settings.store, settings.max_entries, clock.clone());

    let backend: Arc<dyn RateLimiterBackend> = match &settings.burst {
        Some(burst) => {
            let protection = BurstProtection::new(
                burst.burst.clone(),
                burst.sustained.clone(),
                new_store(),
                new_store(),
                clock.clone(),
            )?
            .with_identifier(identifier);
            info!(
                burst = burst.burst.requests,
                sustained = burst.sustained.requests,
                "Burst protection initialized"
            );
            Arc::new(protection)
        }
        None => {
            let table = match &settings.policy_path {
                Some(path) => PolicyTable::from_file(path)?,
                None => PolicyTable::default(),
            };
            let policies = Arc::new(PolicyResolver::new(table, &settings.environment));
            policies.protect();

            info!("Rate limiter initialized");
            Arc::new(RateLimiter::new(new_store(), policies, clock.clone()).with_identifier(identifier))
        }
    };

    let cleanup = CleanupTask::start(
        backend.stores(),
        Duration::from_secs(settings.cleanup_interval_secs.max(1)),
    );

    let server = HttpServer::new(config.server.http_addr, backend);
    let served = server
        .serve_with_shutdown(decision_routes(), shutdown_signal())
        .await;

    cleanup.stop().await;

    if let Err(e) = served {
        error!(error = %e, "Turnstile stopped with an error");
        return Err(e.into());
    }

    info!("Turnstile Rate Limiting Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
