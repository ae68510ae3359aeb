//! Submission queue consumer loop

use std::future::Future;

use anyhow::Result;
use futures::StreamExt;
use tally_broker::{BrokerChannel, BrokerResult, Delivery};
use tally_core::config::BrokerSettings;
use tally_core::{NackPolicy, SubmissionMessage};

use crate::pipeline::ExpenseWorker;

#[derive(Clone, Debug)]
pub struct ConsumerSettings {
    pub submission_queue: String,
    pub result_queue: String,
    pub nack_policy: NackPolicy,
}

impl From<&BrokerSettings> for ConsumerSettings {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            submission_queue: settings.submission_queue.clone(),
            result_queue: settings.result_queue.clone(),
            nack_policy: settings.nack_policy,
        }
    }
}

/// Consume submissions until `shutdown` resolves.
///
/// The in-flight message is always finished before shutdown is observed.
/// Returns an error when the delivery stream ends or fails, which means the
/// broker connection is gone and unsettled messages will be redelivered.
pub async fn run_consumer<F>(
    channel: &dyn BrokerChannel,
    worker: &ExpenseWorker,
    settings: &ConsumerSettings,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut deliveries = channel.consume(&settings.submission_queue).await?;
    tokio::pin!(shutdown);

    tracing::info!(
        queue = %settings.submission_queue,
        reply_queue = %settings.result_queue,
        nack_policy = %settings.nack_policy,
        "Waiting for expense submissions"
    );

    loop {
        let delivery = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested, consumer stopping");
                return Ok(());
            }
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(anyhow::anyhow!(
                        "Delivery stream from {} ended, broker connection lost",
                        settings.submission_queue
                    ));
                }
            }
        };

        handle_delivery(channel, worker, settings, delivery).await?;
    }
}

/// Process one delivery and settle it.
///
/// Undecodable payloads are dropped. A result that cannot be published is
/// nacked according to the nack policy; otherwise the delivery is acked once
/// its result is on the reply queue.
#[tracing::instrument(skip_all, fields(delivery_tag = delivery.tag, redelivered = delivery.redelivered))]
pub async fn handle_delivery(
    channel: &dyn BrokerChannel,
    worker: &ExpenseWorker,
    settings: &ConsumerSettings,
    delivery: Delivery,
) -> BrokerResult<()> {
    let submission: SubmissionMessage = match serde_json::from_slice(&delivery.payload) {
        Ok(submission) => submission,
        Err(e) => {
            tracing::warn!(
                error = %e,
                size_bytes = delivery.payload.len(),
                "Undecodable submission, dropping"
            );
            return channel.nack(delivery.tag, false).await;
        }
    };

    let result = worker.process(&submission).await;

    let published = match serde_json::to_vec(&result) {
        Ok(payload) => channel.publish(&settings.result_queue, &payload).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode result message");
            Err(tally_broker::BrokerError::Publish {
                queue: settings.result_queue.clone(),
                reason: e.to_string(),
            })
        }
    };

    match published {
        Ok(()) => {
            tracing::info!(
                expense_id = %submission.expense_id,
                status = %result.status,
                "Result published"
            );
            channel.ack(delivery.tag).await
        }
        Err(e) => {
            let requeue = settings.nack_policy.should_requeue(delivery.redelivered);
            tracing::error!(
                expense_id = %submission.expense_id,
                error = %e,
                requeue,
                "Failed to publish result"
            );
            channel.nack(delivery.tag, requeue).await
        }
    }
}
