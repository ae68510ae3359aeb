mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use tally_broker::{
    BrokerChannel, BrokerConnector, BrokerError, BrokerResult, DeliveryStream, MemoryBroker,
};
use tally_core::{ExpenseStatus, NackPolicy, ResultMessage, ResultStatus};
use tally_worker::{run_consumer, ConsumerSettings, ExpenseWorker};

fn broker() -> MemoryBroker {
    MemoryBroker::new(vec![SUBMISSIONS.to_string(), RESULTS.to_string()])
}

fn settings(nack_policy: NackPolicy) -> ConsumerSettings {
    ConsumerSettings {
        submission_queue: SUBMISSIONS.to_string(),
        result_queue: RESULTS.to_string(),
        nack_policy,
    }
}

fn simple_worker(store: &tally_db::MockExpenseRepository) -> ExpenseWorker {
    worker(
        store,
        Arc::new(FakeArchiver::default()),
        Arc::new(FakeRecognizer::default()),
        Arc::new(FakeExtractor::returning(lunch())),
    )
}

fn results(broker: &MemoryBroker) -> Vec<ResultMessage> {
    broker
        .published(RESULTS)
        .iter()
        .map(|raw| serde_json::from_slice(raw).unwrap())
        .collect()
}

/// Delegates to a real channel but fails the first `failures` publishes.
struct FlakyPublish {
    inner: Box<dyn BrokerChannel>,
    failures: AtomicU32,
}

#[async_trait]
impl BrokerChannel for FlakyPublish {
    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(BrokerError::Publish {
                queue: queue.to_string(),
                reason: "channel blocked".to_string(),
            });
        }
        self.inner.publish(queue, payload).await
    }

    async fn consume(&self, queue: &str) -> BrokerResult<DeliveryStream> {
        self.inner.consume(queue).await
    }

    async fn ack(&self, tag: u64) -> BrokerResult<()> {
        self.inner.ack(tag).await
    }

    async fn nack(&self, tag: u64, requeue: bool) -> BrokerResult<()> {
        self.inner.nack(tag, requeue).await
    }

    async fn close(&self) -> BrokerResult<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn publishes_one_result_per_delivery_and_acks() {
    let broker = broker();
    let (store, submission) = seeded("parking 10k", &[]);
    let payload = serde_json::to_vec(&submission).unwrap();
    for _ in 0..3 {
        broker.push(SUBMISSIONS, &payload);
    }

    let channel = broker.connect().await.unwrap();
    let worker = simple_worker(&store);
    let outcome = run_consumer(
        channel.as_ref(),
        &worker,
        &settings(NackPolicy::Drop),
        wait_until(|| broker.published(RESULTS).len() == 3),
    )
    .await;

    assert!(outcome.is_ok());
    let results = results(&broker);
    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.interaction_token, submission.interaction_token);
        assert_eq!(result.message_id, submission.message_id);
    }
    assert_eq!(broker.acked().len(), 3);
    assert!(broker.nacked().is_empty());
    assert_eq!(broker.unsettled_count(), 0);
    assert_eq!(
        store.snapshot(submission.expense_id).unwrap().status,
        ExpenseStatus::Completed
    );
}

#[tokio::test]
async fn undecodable_payload_is_dropped_without_result() {
    let broker = broker();
    let (store, submission) = seeded("fuel 200k", &[]);
    broker.push(SUBMISSIONS, b"{not json");
    broker.push(SUBMISSIONS, &serde_json::to_vec(&submission).unwrap());

    let channel = broker.connect().await.unwrap();
    let worker = simple_worker(&store);
    run_consumer(
        channel.as_ref(),
        &worker,
        &settings(NackPolicy::RequeueOnce),
        wait_until(|| broker.published(RESULTS).len() == 1),
    )
    .await
    .unwrap();

    let nacked = broker.nacked();
    assert_eq!(nacked.len(), 1);
    assert!(!nacked[0].1, "malformed payload must not be requeued");
    assert_eq!(broker.acked().len(), 1);
    assert_eq!(broker.ready_count(SUBMISSIONS), 0);
    assert_eq!(results(&broker)[0].status, ResultStatus::Success);
}

#[tokio::test]
async fn failed_processing_still_publishes_and_acks() {
    let broker = broker();
    let (store, submission) = seeded("hotel", &[]);
    store.fail_complete(true);
    broker.push(SUBMISSIONS, &serde_json::to_vec(&submission).unwrap());

    let channel = broker.connect().await.unwrap();
    let worker = simple_worker(&store);
    run_consumer(
        channel.as_ref(),
        &worker,
        &settings(NackPolicy::Drop),
        wait_until(|| broker.published(RESULTS).len() == 1),
    )
    .await
    .unwrap();

    let results = results(&broker);
    assert_eq!(results[0].status, ResultStatus::Failed);
    assert!(results[0].error.is_some());
    assert_eq!(broker.acked().len(), 1);
}

#[tokio::test]
async fn publish_failure_requeues_once_then_drops() {
    let broker = broker();
    let (store, submission) = seeded("dinner", &[]);
    broker.push(SUBMISSIONS, &serde_json::to_vec(&submission).unwrap());

    let channel = FlakyPublish {
        inner: broker.connect().await.unwrap(),
        failures: AtomicU32::new(u32::MAX),
    };
    let worker = simple_worker(&store);
    run_consumer(
        &channel,
        &worker,
        &settings(NackPolicy::RequeueOnce),
        wait_until(|| broker.nacked().len() == 2),
    )
    .await
    .unwrap();

    let requeued: Vec<bool> = broker.nacked().iter().map(|(_, requeue)| *requeue).collect();
    assert_eq!(requeued, vec![true, false]);
    assert!(broker.published(RESULTS).is_empty());
    assert!(broker.acked().is_empty());
    assert_eq!(broker.ready_count(SUBMISSIONS), 0);
}

#[tokio::test]
async fn publish_failure_drops_by_default() {
    let broker = broker();
    let (store, submission) = seeded("dinner", &[]);
    broker.push(SUBMISSIONS, &serde_json::to_vec(&submission).unwrap());

    let channel = FlakyPublish {
        inner: broker.connect().await.unwrap(),
        failures: AtomicU32::new(1),
    };
    let worker = simple_worker(&store);
    run_consumer(
        &channel,
        &worker,
        &settings(NackPolicy::Drop),
        wait_until(|| broker.nacked().len() == 1),
    )
    .await
    .unwrap();

    assert_eq!(broker.nacked().len(), 1);
    assert!(!broker.nacked()[0].1);
    assert_eq!(broker.ready_count(SUBMISSIONS), 0);
}

#[tokio::test]
async fn closed_channel_ends_consumer_with_error() {
    let broker = broker();
    let (store, _) = seeded("", &[]);
    let channel = broker.connect().await.unwrap();
    let worker = simple_worker(&store);
    let settings = settings(NackPolicy::Drop);

    let (outcome, closed) = tokio::join!(
        run_consumer(
            channel.as_ref(),
            &worker,
            &settings,
            std::future::pending::<()>()
        ),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            channel.close().await
        }
    );

    assert!(closed.is_ok());
    assert!(outcome.is_err());
}
