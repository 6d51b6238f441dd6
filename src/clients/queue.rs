use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::message::QueueKind;

pub type MessageAttributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    /// Opaque token that acknowledges this particular delivery.
    pub receipt: String,
    pub attributes: MessageAttributes,
    /// 1 on first delivery, incremented on every redelivery.
    pub receive_count: u32,
}

/// Approximate queue depth. Backends that cannot report a figure return 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttributes {
    pub approx_visible: u64,
    pub approx_in_flight: u64,
    pub approx_delayed: u64,
}

/// One logical queue. Messages that are received but never deleted become
/// visible again and are redelivered.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, Error>;

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, Error>;

    async fn delete(&self, receipt: &str) -> Result<(), Error>;

    /// Drops every message; returns how many were removed when known.
    async fn purge(&self) -> Result<u64, Error>;

    async fn attributes(&self) -> Result<QueueAttributes, Error>;
}

#[derive(Clone)]
pub struct QueueSet {
    pub events: Arc<dyn MessageQueue>,
    pub reservations: Arc<dyn MessageQueue>,
    pub reminders: Arc<dyn MessageQueue>,
}

impl QueueSet {
    pub fn new(
        events: Arc<dyn MessageQueue>,
        reservations: Arc<dyn MessageQueue>,
        reminders: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            events,
            reservations,
            reminders,
        }
    }

    pub fn get(&self, kind: QueueKind) -> &Arc<dyn MessageQueue> {
        match kind {
            QueueKind::Events => &self.events,
            QueueKind::Reservations => &self.reservations,
            QueueKind::Reminders => &self.reminders,
        }
    }
}
