use anyhow::{Context, Result};
use std::sync::Arc;

use tally_broker::{connect_with_retry, AmqpConnector};
use tally_core::WorkerConfig;
use tally_db::{setup_pool, ExpenseRepository};
use tally_extract::{HttpImageArchiver, HttpTextRecognizer, LlmStructuredExtractor};
use tally_infra::{init_telemetry, shutdown_signal};
use tally_storage::create_storage;
use tally_worker::{run_consumer, ConsumerSettings, ExpenseWorker};

const SERVICE_NAME: &str = "tally-worker";

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env().context("Failed to load configuration")?;

    init_telemetry(SERVICE_NAME, &config.environment, config.log_json)
        .context("Failed to initialize tracing")?;

    config.validate().context("Invalid configuration")?;

    tracing::info!(
        environment = %config.environment,
        submission_queue = %config.broker.submission_queue,
        result_queue = %config.broker.result_queue,
        storage_backend = %config.storage.backend,
        "Starting expense worker"
    );

    let pool = setup_pool(
        &config.database_url,
        config.db_max_connections,
        config.db_timeout_seconds,
    )
    .await?;
    let store = Arc::new(ExpenseRepository::new(pool.clone()));

    let storage = create_storage(&config.storage)
        .await
        .context("Failed to initialize object storage")?;
    storage
        .ensure_ready()
        .await
        .context("Failed to provision object storage")?;

    let max_image_size = config
        .max_image_size_bytes()
        .context("MAX_IMAGE_SIZE_MB is too large")?;
    let archiver = Arc::new(HttpImageArchiver::new(
        storage,
        config.image_fetch_timeout,
        max_image_size,
    )?);
    let recognizer = Arc::new(HttpTextRecognizer::new(
        &config.ocr.base_url,
        &config.ocr.path,
        config.ocr.timeout,
    )?);
    let extractor = Arc::new(LlmStructuredExtractor::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.api_key.clone(),
        config.llm.timeout,
    )?);

    let worker = ExpenseWorker::new(
        store,
        archiver,
        recognizer,
        extractor,
        config.message_timeout,
    );

    let connector = AmqpConnector::new(
        config.broker.url.clone(),
        vec![
            config.broker.submission_queue.clone(),
            config.broker.result_queue.clone(),
        ],
        SERVICE_NAME,
    );
    let channel = connect_with_retry(
        &connector,
        config.broker.connect_max_retries,
        config.broker.connect_retry_delay,
    )
    .await
    .context("Message broker unreachable")?;

    let settings = ConsumerSettings::from(&config.broker);
    let outcome = run_consumer(channel.as_ref(), &worker, &settings, shutdown_signal()).await;

    if let Err(e) = channel.close().await {
        tracing::warn!(error = %e, "Failed to close broker channel");
    }
    pool.close().await;

    if let Err(ref e) = outcome {
        tracing::error!(error = %e, "Consumer stopped with error");
    }
    outcome
}
