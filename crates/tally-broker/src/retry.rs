//! Bounded-retry broker connect.

use std::time::Duration;

use crate::traits::{BrokerChannel, BrokerConnector, BrokerError, BrokerResult};

/// Try `connector` up to `max_retries` times, sleeping `retry_delay` between attempts.
///
/// Nothing from a failed attempt is kept. Returns `RetriesExhausted` once every
/// attempt has failed; callers treat that as fatal.
pub async fn connect_with_retry(
    connector: &dyn BrokerConnector,
    max_retries: u32,
    retry_delay: Duration,
) -> BrokerResult<Box<dyn BrokerChannel>> {
    let mut last_error = String::from("no attempts made");

    for attempt in 1..=max_retries {
        match connector.connect().await {
            Ok(channel) => {
                tracing::info!(attempt, "Connected to message broker");
                return Ok(channel);
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    max_retries,
                    error = %e,
                    "Message broker connection failed"
                );
                last_error = e.to_string();
                if attempt < max_retries {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    tracing::error!(attempts = max_retries, "Giving up on message broker");
    Err(BrokerError::RetriesExhausted {
        attempts: max_retries,
        last_error,
    })
}
