//! Tally CLI: submit expenses to the worker queue and read back results.
//!
//! Reads the same environment as the worker (DATABASE_URL, RABBITMQ_URL and
//! the queue names).

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::time::Duration;
use tally_broker::{connect_with_retry, AmqpConnector, BrokerChannel};
use tally_cli::{build_submission, describe_result, init_tracing, SubmitRequest};
use tally_core::{ResultMessage, WorkerConfig};
use tally_db::{setup_pool, ExpenseRepository};
use tally_infra::shutdown_signal;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tally", about = "Tally expense pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an expense and queue it for processing
    Submit {
        /// Submitting user's id
        #[arg(long)]
        user_id: String,
        /// Submitting user's display tag
        #[arg(long)]
        user_tag: String,
        /// Free text describing the expense
        #[arg(long, default_value = "")]
        text: String,
        /// Receipt image URL (repeatable)
        #[arg(long = "image-url")]
        image_urls: Vec<String>,
        /// Originating channel
        #[arg(long)]
        channel_id: Option<String>,
        /// Submitted in a direct message
        #[arg(long)]
        dm: bool,
    },
    /// Print result messages and acknowledge them
    Results {
        /// Stop after this many results
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show a stored expense as JSON
    Show {
        /// Expense UUID
        id: Uuid,
    },
}

async fn open_channel(config: &WorkerConfig) -> anyhow::Result<Box<dyn BrokerChannel>> {
    let connector = AmqpConnector::new(
        config.broker.url.clone(),
        vec![
            config.broker.submission_queue.clone(),
            config.broker.result_queue.clone(),
        ],
        "tally-cli",
    );
    // The CLI gives up sooner than the worker
    let channel = connect_with_retry(
        &connector,
        config.broker.connect_max_retries.min(3),
        Duration::from_secs(1),
    )
    .await
    .context("Message broker unreachable")?;
    Ok(channel)
}

async fn print_results(
    channel: &dyn BrokerChannel,
    queue: &str,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let mut deliveries = channel.consume(queue).await?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut seen = 0usize;

    while limit.map_or(true, |l| seen < l) {
        let delivery = tokio::select! {
            _ = &mut shutdown => break,
            next = deliveries.next() => match next {
                Some(delivery) => delivery?,
                None => anyhow::bail!("Result stream closed"),
            }
        };

        match serde_json::from_slice::<ResultMessage>(&delivery.payload) {
            Ok(result) => println!("{}", describe_result(&result)),
            Err(e) => tracing::warn!(error = %e, "Skipping undecodable result"),
        }
        channel.ack(delivery.tag).await?;
        seen += 1;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Submit {
            user_id,
            user_tag,
            text,
            image_urls,
            channel_id,
            dm,
        } => {
            let (expense, submission) = build_submission(SubmitRequest {
                user_id,
                user_tag,
                text,
                image_urls,
                channel_id,
                is_dm: dm,
            })?;

            let pool = setup_pool(&config.database_url, 1, config.db_timeout_seconds).await?;
            let repository = ExpenseRepository::new(pool.clone());
            let record = repository
                .create(expense)
                .await
                .context("Failed to record expense")?;

            let channel = open_channel(&config).await?;
            let payload = serde_json::to_vec(&submission).context("Serialize submission")?;
            channel
                .publish(&config.broker.submission_queue, &payload)
                .await
                .context("Failed to queue expense")?;
            channel.close().await?;
            pool.close().await;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "expenseId": record.id,
                    "interactionToken": record.interaction_token,
                    "status": record.status,
                }))?
            );
        }
        Commands::Results { limit } => {
            let channel = open_channel(&config).await?;
            let outcome = print_results(channel.as_ref(), &config.broker.result_queue, limit).await;
            channel.close().await?;
            outcome?;
        }
        Commands::Show { id } => {
            let pool = setup_pool(&config.database_url, 1, config.db_timeout_seconds).await?;
            let repository = ExpenseRepository::new(pool.clone());
            let expense = repository.get(id).await?;
            pool.close().await;

            match expense {
                Some(expense) => println!("{}", serde_json::to_string_pretty(&expense)?),
                None => anyhow::bail!("Expense {} not found", id),
            }
        }
    }

    Ok(())
}
