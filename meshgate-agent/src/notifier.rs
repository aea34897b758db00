//! Change events handed from the watch loops to the downstream publisher
//!
//! Enqueueing never waits: when the consumer falls behind, the event is dropped and
//! counted, and polling carries on.

use crate::error::{AgentError, Result};
use log::{debug, warn};
use meshgate_common::MetricKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Added,
    Modified,
}

/// One change notification, with the serialized metric as payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub target: MetricKind,
    pub payload: Value,
}

impl Event {
    pub fn added(target: MetricKind, payload: Value) -> Self {
        Self {
            kind: EventKind::Added,
            target,
            payload,
        }
    }

    pub fn modified(target: MetricKind, payload: Value) -> Self {
        Self {
            kind: EventKind::Modified,
            target,
            payload,
        }
    }
}

/// Sink for change events. Implementations must not block.
pub trait Publisher: Send + Sync {
    fn enqueue(&self, event: Event) -> Result<()>;
}

/// Publisher backed by a bounded channel with a single consumer
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Event>,
    events_published: Arc<AtomicU64>,
    events_dropped: Arc<AtomicU64>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end for the downstream transport
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let notifier = Self {
            tx,
            events_published: Arc::new(AtomicU64::new(0)),
            events_dropped: Arc::new(AtomicU64::new(0)),
        };
        (notifier, rx)
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

impl Publisher for ChannelNotifier {
    fn enqueue(&self, event: Event) -> Result<()> {
        let target = event.target;

        match self.tx.try_send(event) {
            Ok(()) => {
                self.events_published.fetch_add(1, Ordering::Relaxed);
                debug!("Enqueued {} event", target);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Event channel full, dropping {} event", target);
                Err(AgentError::NotifierFull(target))
            }
            Err(TrySendError::Closed(_)) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                Err(AgentError::NotifierClosed)
            }
        }
    }
}
