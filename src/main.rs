use mlm_engine::notify::{LogNotifier, Notifier, WebhookNotifier};
use mlm_engine::orchestration::RebateProcessor;
use mlm_engine::{api, config::Config, db::init_db, Cache, MemoryCache, Repository, Services};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    // Initialize database and dependencies
    let pool = init_db(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let repo = Arc::new(Repository::new(pool));
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };
    let services = Services::new(repo, cache, notifier, config.compensation.clone());

    if let Some(every) = config.rebate_process_interval {
        tokio::spawn(run_rebate_job(services.processor.clone(), every));
    }

    // Create router
    let app = api::create_router(api::AppState::new(services, config.compensation.clone()));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// Periodic pending-rebate sweep; a failed run is logged and retried next tick.
async fn run_rebate_job(processor: Arc<RebateProcessor>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match processor.process_pending_rebates().await {
            Ok(summary) if summary.processed + summary.failed > 0 => {
                tracing::info!(
                    processed = summary.processed,
                    failed = summary.failed,
                    total_credited = %summary.total_credited,
                    "Rebate job finished"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Rebate job failed"),
        }
    }
}
