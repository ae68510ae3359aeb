//! In-process broker with durable-queue semantics
//!
//! Messages stay unsettled after delivery until acked or nacked; a nack with
//! requeue, or closing the channel that holds them, puts them back at the
//! head of their queue flagged as redelivered. Every channel shares the
//! broker state, so a test can publish, run a consumer, and inspect what was
//! acked, nacked and published.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::traits::{
    BrokerChannel, BrokerConnector, BrokerError, BrokerResult, Delivery, DeliveryStream,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct Unsettled {
    queue: String,
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    unsettled: HashMap<u64, Unsettled>,
    published: HashMap<String, Vec<Vec<u8>>>,
    acked: Vec<u64>,
    nacked: Vec<(u64, bool)>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
    next_tag: AtomicU64,
    next_channel: AtomicU64,
    failing_connects: AtomicU32,
    connect_attempts: AtomicU32,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // State stays consistent across a panicking holder, so poison is ignored
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
    queues: Arc<Vec<String>>,
}

impl MemoryBroker {
    /// Broker whose `connect` declares `queues`.
    pub fn new(queues: Vec<String>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            queues: Arc::new(queues),
        }
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.shared.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Enqueue a message as if another producer had published it.
    pub fn push(&self, queue: &str, payload: &[u8]) {
        {
            let mut state = self.shared.lock();
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(StoredMessage {
                    payload: payload.to_vec(),
                    redelivered: false,
                });
        }
        self.shared.notify.notify_waiters();
    }

    /// Every payload published to `queue` through a channel, in order.
    pub fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .published
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages waiting in `queue`, not counting unsettled deliveries.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn unsettled_count(&self) -> usize {
        self.shared.lock().unsettled.len()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.shared.lock().acked.clone()
    }

    /// `(tag, requeue)` for every nack.
    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.shared.lock().nacked.clone()
    }

    /// Open a channel directly, without the failure injection of `connect`.
    pub fn channel(&self) -> MemoryChannel {
        {
            let mut state = self.shared.lock();
            for queue in self.queues.iter() {
                state.queues.entry(queue.clone()).or_default();
            }
        }
        MemoryChannel {
            shared: self.shared.clone(),
            id: self.shared.next_channel.fetch_add(1, Ordering::SeqCst),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> BrokerResult<Box<dyn BrokerChannel>> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.shared.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared
                .failing_connects
                .store(failing - 1, Ordering::SeqCst);
            return Err(BrokerError::Connect("connection refused".to_string()));
        }
        Ok(Box::new(self.channel()))
    }
}

pub struct MemoryChannel {
    shared: Arc<Shared>,
    id: u64,
    closed: Arc<AtomicBool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Channel("channel closed".to_string()));
        }
        Ok(())
    }

    fn settle(&self, tag: u64) -> BrokerResult<Unsettled> {
        let mut state = self.shared.lock();
        match state.unsettled.get(&tag) {
            Some(entry) if entry.channel_id == self.id => {}
            _ => {
                return Err(BrokerError::Channel(format!("unknown delivery tag {}", tag)));
            }
        }
        state
            .unsettled
            .remove(&tag)
            .ok_or_else(|| BrokerError::Channel(format!("unknown delivery tag {}", tag)))
    }
}

/// Pop the next ready message of `queue` and record it as unsettled.
fn take_next(shared: &Shared, queue: &str, channel_id: u64) -> Option<Delivery> {
    let mut state = shared.lock();
    let message = state.queues.get_mut(queue)?.pop_front()?;
    let tag = shared.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
    let delivery = Delivery {
        tag,
        payload: message.payload.clone(),
        redelivered: message.redelivered,
    };
    state.unsettled.insert(
        tag,
        Unsettled {
            queue: queue.to_string(),
            channel_id,
            message,
        },
    );
    Some(delivery)
}

fn requeue_front(state: &mut State, entry: Unsettled) {
    state
        .queues
        .entry(entry.queue)
        .or_default()
        .push_front(StoredMessage {
            payload: entry.message.payload,
            redelivered: true,
        });
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<()> {
        self.ensure_open().map_err(|e| BrokerError::Publish {
            queue: queue.to_string(),
            reason: e.to_string(),
        })?;
        {
            let mut state = self.shared.lock();
            state
                .published
                .entry(queue.to_string())
                .or_default()
                .push(payload.to_vec());
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(StoredMessage {
                    payload: payload.to_vec(),
                    redelivered: false,
                });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> BrokerResult<DeliveryStream> {
        self.ensure_open().map_err(|e| BrokerError::Consume {
            queue: queue.to_string(),
            reason: e.to_string(),
        })?;

        let state = (
            self.shared.clone(),
            self.closed.clone(),
            queue.to_string(),
            self.id,
        );

        let stream = futures::stream::unfold(state, |(shared, closed, queue, id)| async move {
            loop {
                // Registered before checking so a publish in between is not missed
                let notified = shared.notify.notified();
                if closed.load(Ordering::SeqCst) {
                    return None;
                }
                // Prefetch of one: wait while this channel holds an unsettled delivery
                let busy = shared
                    .lock()
                    .unsettled
                    .values()
                    .any(|u| u.channel_id == id && u.queue == queue);
                let next = if busy {
                    None
                } else {
                    take_next(&shared, &queue, id)
                };
                if let Some(delivery) = next {
                    drop(notified);
                    return Some((Ok(delivery), (shared, closed, queue, id)));
                }
                notified.await;
            }
        });

        Ok(stream.boxed())
    }

    async fn ack(&self, tag: u64) -> BrokerResult<()> {
        self.settle(tag)?;
        self.shared.lock().acked.push(tag);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, tag: u64, requeue: bool) -> BrokerResult<()> {
        let entry = self.settle(tag)?;
        {
            let mut state = self.shared.lock();
            state.nacked.push((tag, requeue));
            if requeue {
                requeue_front(&mut state, entry);
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        {
            let mut state = self.shared.lock();
            let held: Vec<u64> = state
                .unsettled
                .iter()
                .filter(|(_, u)| u.channel_id == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in held {
                if let Some(entry) = state.unsettled.remove(&tag) {
                    requeue_front(&mut state, entry);
                }
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
