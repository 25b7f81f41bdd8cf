use anyhow::Result;
use clap::Parser;
use siteforge::broker::Broker;
use siteforge::config;
use siteforge::db;
use siteforge::debounce::{DebounceAggregator, DebounceSettings};
use siteforge::events::EventBus;
use siteforge::freeze::FreezeController;
use siteforge::pipeline::{CommandToolchain, Executor, Settings};
use siteforge::queue::{self, Consumer, EventIntake, Publisher, RetryPolicy};
use siteforge::services::{
    BlobFragmentPatcher, FragmentPatcher, HttpBillingClient, HttpBlobStore, HttpCatalogClient,
    HttpDeployClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    queue::validate_routes()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/siteforge.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let rpc_timeout = Duration::from_secs(cfg.services.rpc_timeout_seconds);
    let catalog = Arc::new(HttpCatalogClient::new(&cfg.services.catalog_url, rpc_timeout)?);
    let billing = Arc::new(HttpBillingClient::new(&cfg.services.billing_url, rpc_timeout)?);
    let deploy = Arc::new(HttpDeployClient::new(&cfg.services.deploy_url, rpc_timeout)?);
    let blob = Arc::new(HttpBlobStore::new(
        &cfg.storage.endpoint,
        &cfg.storage.bucket,
        rpc_timeout,
    )?);

    let broker = Broker::new();
    broker.declare_queue(&cfg.queue.topic, Some(cfg.queue.max_priority));
    broker.declare_queue(&queue::dead_letter_queue(&cfg.queue.topic), None);
    broker.declare_queue(&cfg.queue.events_queue, None);

    let events = EventBus::default();
    let toolchain = Arc::new(CommandToolchain::new(
        cfg.build.install_command.clone(),
        cfg.build.build_command.clone(),
        &cfg.build.output_dir,
        Duration::from_secs(cfg.build.timeout_seconds),
    ));
    let executor = Arc::new(Executor::new(
        pool.clone(),
        catalog.clone(),
        blob.clone(),
        deploy.clone(),
        toolchain,
        events.clone(),
        Settings {
            work_root: PathBuf::from(&cfg.app.work_dir),
            bucket: cfg.storage.bucket.clone(),
        },
    ));

    let publisher = Publisher::new(broker.clone(), &cfg.queue.topic, billing.clone());
    let patcher: Arc<dyn FragmentPatcher> =
        Arc::new(BlobFragmentPatcher::new(catalog.clone(), blob.clone()));
    let aggregator = Arc::new(DebounceAggregator::new(
        pool.clone(),
        publisher,
        patcher,
        DebounceSettings {
            rebuild_window: Duration::from_secs(cfg.debounce.rebuild_window_seconds),
            patch_window: Duration::from_secs(cfg.debounce.patch_window_seconds),
        },
    ));
    let freeze = Arc::new(FreezeController::new(
        pool.clone(),
        deploy.clone(),
        events.clone(),
    ));

    let consumer = Arc::new(Consumer::new(
        broker.clone(),
        &cfg.queue.topic,
        cfg.queue.prefetch,
        pool.clone(),
        executor,
        RetryPolicy::default(),
    ));
    let intake = Arc::new(EventIntake::new(
        broker.clone(),
        &cfg.queue.events_queue,
        aggregator.clone(),
        freeze,
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let consumer_task = tokio::spawn(consumer.run(shutdown_tx.subscribe()));
    let intake_task = tokio::spawn(intake.run(shutdown_tx.subscribe()));

    info!(topic = %cfg.queue.topic, prefetch = cfg.queue.prefetch, "siteforge consumer started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let _ = shutdown_tx.send(());
    aggregator.shutdown();
    broker.shutdown();
    let _ = consumer_task.await;
    let _ = intake_task.await;
    pool.close().await;

    Ok(())
}
