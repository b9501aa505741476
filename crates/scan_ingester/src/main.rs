mod config;

use anyhow::Context;
use common::domain::ScanRecordRepository;
use common::nats::{NatsClient, NatsSubscriptionFeed, SubscriptionFeed};
use common::postgres::{PostgresClient, PostgresScanRecordRepository};
use common::telemetry::{init_telemetry, TelemetryConfig};
use crate::config::ServiceConfig;
use scan_runner::Runner;
use scan_worker::ScanWorker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        service_name: "scan_ingester".to_string(),
        log_level: config.log_level.clone(),
        json: config.log_json,
    }) {
        eprintln!("Failed to initialize telemetry: {:#}", e);
        std::process::exit(1);
    }

    info!(
        stream = %config.nats_stream,
        subscription = %config.subscription,
        table = %config.scan_table,
        "Starting scan ingester"
    );
    debug!("Configuration: {:?}", config);

    let (repository, postgres_client, nats_client) =
        match initialize_shared_dependencies(&config).await {
            Ok(deps) => deps,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Failed to initialize shared dependencies");
                std::process::exit(1);
            }
        };

    let feed = match create_subscription_feed(&nats_client, &config).await {
        Ok(feed) => feed,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to create subscription feed");
            std::process::exit(1);
        }
    };

    let worker = match ScanWorker::new(
        feed,
        repository,
        config.worker_config(),
        info_span!("scan_worker", subscription = %config.subscription),
    ) {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to create scan worker");
            std::process::exit(1);
        }
    };

    let result = Runner::new()
        .with_named_process("scan_worker", move |ctx| worker.run(ctx))
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            nats_client.close().await?;
            postgres_client.close();
            info!("Cleanup complete");
            anyhow::Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs))
        .run()
        .await;

    if let Err(e) = result {
        error!(error = %format!("{:#}", e), "Scan ingester stopped with an error");
        std::process::exit(1);
    }
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<dyn ScanRecordRepository>, PostgresClient, NatsClient)> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);

    info!("Initializing PostgreSQL...");
    let postgres_client = PostgresClient::new(&config.postgres_config())?;
    tokio::time::timeout(startup_timeout, postgres_client.ping())
        .await
        .context("Timed out connecting to PostgreSQL")?
        .context("Failed to reach PostgreSQL")?;
    let repository: Arc<dyn ScanRecordRepository> = Arc::new(PostgresScanRecordRepository::new(
        postgres_client.clone(),
        config.scan_table.clone(),
    ));

    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(&config.nats_url, startup_timeout).await?;
    nats_client
        .ensure_stream(&config.nats_stream, vec![config.nats_subject.clone()])
        .await?;

    Ok((repository, postgres_client, nats_client))
}

async fn create_subscription_feed(
    nats_client: &NatsClient,
    config: &ServiceConfig,
) -> anyhow::Result<Arc<dyn SubscriptionFeed>> {
    let feed = NatsSubscriptionFeed::new(
        nats_client.create_consumer_client(),
        &config.nats_stream,
        &config.subscription,
        &config.nats_subject,
    )
    .await?;
    Ok(Arc::new(feed))
}
