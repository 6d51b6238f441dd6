//! In-process implementations of the queue, record store and email transport.
//! The worker never uses them; they back the test suite and local experiments.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    sync::{Mutex, Notify},
    time::{Instant, timeout},
};
use uuid::Uuid;

use crate::{
    clients::{
        email::EmailTransport,
        queue::{MessageAttributes, MessageQueue, QueueAttributes, ReceivedMessage},
        store::{Collection, Item, RecordStore, ScanFilter, item_id, matches_filter, next_updated_at},
    },
    error::StoreError,
    models::email::OutboundEmail,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    attributes: MessageAttributes,
    receive_count: u32,
}

#[derive(Debug, Clone)]
struct InFlight {
    seq: u64,
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    visible: BTreeMap<u64, StoredMessage>,
    in_flight: HashMap<String, InFlight>,
    sent: Vec<(String, String)>,
    deleted: Vec<String>,
    operations: usize,
    fail_sends: bool,
    fail_receives: bool,
    fail_deletes: HashSet<String>,
}

impl QueueState {
    fn restore_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(entry) = self.in_flight.remove(&receipt) {
                self.visible.insert(entry.seq, entry.message);
            }
        }
    }

    fn take(&mut self, max_messages: usize, visibility: Duration, now: Instant) -> Vec<ReceivedMessage> {
        let seqs: Vec<u64> = self.visible.keys().take(max_messages).copied().collect();
        let mut received = Vec::with_capacity(seqs.len());

        for seq in seqs {
            let Some(mut message) = self.visible.remove(&seq) else {
                continue;
            };
            message.receive_count += 1;

            let receipt = Uuid::new_v4().to_string();
            received.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                body: message.body.clone(),
                receipt: receipt.clone(),
                attributes: message.attributes.clone(),
                receive_count: message.receive_count,
            });

            self.in_flight.insert(
                receipt,
                InFlight {
                    seq,
                    message,
                    visible_at: now + visibility,
                },
            );
        }

        received
    }
}

/// Queue with SQS-like visibility semantics: a received message is hidden
/// until it is deleted or its visibility timeout lapses. With the default
/// timeout of zero, every undeleted message is redelivered on the next receive.
pub struct InMemoryQueue {
    name: String,
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
    arrivals: Notify,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility_timeout: Duration::ZERO,
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
        }
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub async fn set_fail_sends(&self, fail: bool) {
        self.state.lock().await.fail_sends = fail;
    }

    pub async fn set_fail_receives(&self, fail: bool) {
        self.state.lock().await.fail_receives = fail;
    }

    /// Makes deleting this particular message fail.
    pub async fn fail_delete_for(&self, message_id: impl Into<String>) {
        self.state.lock().await.fail_deletes.insert(message_id.into());
    }

    /// Bodies of every successfully sent message, in send order.
    pub async fn sent_bodies(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub async fn sent_count(&self) -> usize {
        self.state.lock().await.sent.len()
    }

    pub async fn deleted_ids(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    /// Every call made through [`MessageQueue`], failed ones included.
    pub async fn operation_count(&self) -> usize {
        self.state.lock().await.operations
    }

    pub async fn visible_count(&self) -> usize {
        self.state.lock().await.visible.len()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, Error> {
        let mut state = self.state.lock().await;
        state.operations += 1;

        if state.fail_sends {
            return Err(anyhow!("queue {} rejected the message", self.name));
        }

        let message_id = Uuid::new_v4().to_string();
        let seq = state.next_seq;
        state.next_seq += 1;

        state.visible.insert(
            seq,
            StoredMessage {
                message_id: message_id.clone(),
                body: body.to_string(),
                attributes: attributes.clone(),
                receive_count: 0,
            },
        );
        state.sent.push((message_id.clone(), body.to_string()));
        drop(state);

        self.arrivals.notify_waiters();

        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, Error> {
        let deadline = Instant::now() + wait;
        let mut counted = false;

        loop {
            let arrival = self.arrivals.notified();

            {
                let mut state = self.state.lock().await;
                if !counted {
                    state.operations += 1;
                    counted = true;
                }

                if state.fail_receives {
                    return Err(anyhow!("queue {} is unreachable", self.name));
                }

                let now = Instant::now();
                state.restore_expired(now);

                let received = state.take(max_messages, self.visibility_timeout, now);
                if !received.is_empty() || now >= deadline {
                    return Ok(received);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let _ = timeout(remaining, arrival).await;
        }
    }

    async fn delete(&self, receipt: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.operations += 1;

        let message_id = match state.in_flight.get(receipt) {
            Some(entry) => entry.message.message_id.clone(),
            None => return Err(anyhow!("receipt {} is not in flight", receipt)),
        };

        if state.fail_deletes.contains(&message_id) {
            return Err(anyhow!("queue {} failed to delete {}", self.name, message_id));
        }

        state.in_flight.remove(receipt);
        state.deleted.push(message_id);

        Ok(())
    }

    async fn purge(&self) -> Result<u64, Error> {
        let mut state = self.state.lock().await;
        state.operations += 1;

        let purged = state.visible.len() + state.in_flight.len();
        state.visible.clear();
        state.in_flight.clear();

        Ok(purged as u64)
    }

    async fn attributes(&self) -> Result<QueueAttributes, Error> {
        let mut state = self.state.lock().await;
        state.operations += 1;

        Ok(QueueAttributes {
            approx_visible: state.visible.len() as u64,
            approx_in_flight: state.in_flight.len() as u64,
            approx_delayed: 0,
        })
    }
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<Collection, BTreeMap<String, Item>>,
    missing: HashSet<Collection>,
    unavailable: bool,
}

impl StoreState {
    fn check(&self, collection: Collection) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Connectivity(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        if self.missing.contains(&collection) {
            return Err(StoreError::CollectionNotFound(collection.name().to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<StoreState>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store in which `collection` was never created.
    pub fn without_collection(collection: Collection) -> Self {
        Self {
            state: Mutex::new(StoreState {
                missing: HashSet::from([collection]),
                ..Default::default()
            }),
        }
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn len(&self, collection: Collection) -> usize {
        self.state
            .lock()
            .await
            .collections
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(&self, collection: Collection, item: Item) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check(collection)?;

        let id = item_id(&item)?.to_string();
        state.collections.entry(collection).or_default().insert(id, item);

        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Item>, StoreError> {
        let state = self.state.lock().await;
        state.check(collection)?;

        Ok(state
            .collections
            .get(&collection)
            .and_then(|items| items.get(id))
            .cloned())
    }

    async fn scan(
        &self,
        collection: Collection,
        filter: &ScanFilter,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        let state = self.state.lock().await;
        state.check(collection)?;

        Ok(state
            .collections
            .get(&collection)
            .map(|items| {
                items
                    .values()
                    .filter(|item| matches_filter(item, filter))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Item,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.check(collection)?;

        let Some(item) = state
            .collections
            .get_mut(&collection)
            .and_then(|items| items.get_mut(id))
        else {
            return Ok(false);
        };

        for (field, value) in fields {
            if field != "id" {
                item.insert(field, value);
            }
        }

        let updated_at = next_updated_at(item.get("updated_at"), Utc::now());
        item.insert("updated_at".to_string(), updated_at);

        Ok(true)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check(collection)?;

        if let Some(items) = state.collections.get_mut(&collection) {
            items.remove(id);
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        if self.state.lock().await.unavailable {
            return Err(StoreError::Connectivity(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Never,
    Always(String),
    Recipients(HashSet<String>),
}

/// Email transport that captures delivered mail and fails on demand.
pub struct MockEmailTransport {
    sent_emails: Arc<Mutex<Vec<OutboundEmail>>>,
    attempts: AtomicUsize,
    failure: Failure,
}

impl MockEmailTransport {
    pub fn new() -> Self {
        Self {
            sent_emails: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
            failure: Failure::Never,
        }
    }

    /// Every send fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Failure::Always(message.into()),
            ..Self::new()
        }
    }

    /// Sends to any of `recipients` fail; the rest succeed.
    pub fn failing_for<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failure: Failure::Recipients(recipients.into_iter().map(Into::into).collect()),
            ..Self::new()
        }
    }

    pub async fn sent_emails(&self) -> Vec<OutboundEmail> {
        self.sent_emails.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent_emails.lock().await.len()
    }

    /// Sends attempted, failed ones included.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn was_sent_to(&self, recipient: &str) -> bool {
        self.sent_emails
            .lock()
            .await
            .iter()
            .any(|email| email.to == recipient)
    }
}

impl Default for MockEmailTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailTransport for MockEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        match &self.failure {
            Failure::Always(message) => return Err(anyhow!(message.clone())),
            Failure::Recipients(recipients) if recipients.contains(&email.to) => {
                return Err(anyhow!("mock transport refused {}", email.to));
            }
            _ => {}
        }

        self.sent_emails.lock().await.push(email.clone());

        Ok(format!("mock-{}", Uuid::new_v4()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
