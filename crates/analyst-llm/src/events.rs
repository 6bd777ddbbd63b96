use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use analyst_core::{ErrorKind, ProviderId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new() -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// State transitions of a single `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    AttemptStarted {
        meta: EventMeta,
        operation: String,
        provider_id: ProviderId,
        attempt: u32,
    },
    AttemptFailed {
        meta: EventMeta,
        operation: String,
        provider_id: ProviderId,
        attempt: u32,
        error: ErrorKind,
    },
    Retrying {
        meta: EventMeta,
        operation: String,
        provider_id: ProviderId,
        delay_ms: u64,
    },
    FallbackStarted {
        meta: EventMeta,
        operation: String,
        from: ProviderId,
        to: ProviderId,
    },
    Succeeded {
        meta: EventMeta,
        operation: String,
        provider_id: ProviderId,
        attempts: u32,
        fallback_used: bool,
    },
    FailedFinal {
        meta: EventMeta,
        operation: String,
        error: ErrorKind,
        attempts: u32,
    },
}

/// Bounded, non-blocking channel for executor events.
///
/// A full channel drops the event and bumps the dropped counter; emitting
/// never waits on the consumer.
pub struct EventBus {
    tx: mpsc::Sender<ExecutorEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExecutorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn emit(&self, event: ExecutorEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}
