//! Loader event dispatch
//!
//! Notifies the surrounding view layer about:
//! - Cache hits and misses
//! - Fetch start, completion and failure
//! - Cache evictions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Loader event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoaderEvent {
    /// Request answered from buffered bytes without waiting on the network
    CacheHit {
        url: String,
        offset: u64,
        bytes: u64,
    },

    /// Request needed a new fetch
    CacheMiss {
        url: String,
    },

    /// Fetch issued to the network client
    FetchStarted {
        url: String,
        upstream: String,
        range_start: Option<u64>,
    },

    /// Fetch reached end-of-stream
    FetchCompleted {
        url: String,
        bytes: u64,
        content_type: Option<String>,
    },

    /// Fetch failed; every pending request received the error
    FetchFailed {
        url: String,
        code: String,
        message: String,
        pending_failed: usize,
    },

    /// Entry dropped to stay within the cache budget
    Evicted {
        url: String,
        bytes: u64,
    },
}

/// Loader event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderEventRecord {
    /// Unique event ID
    pub id: Uuid,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Sequence number
    pub sequence: u64,
    /// The event
    #[serde(flatten)]
    pub event: LoaderEvent,
}

/// Event dispatcher
///
/// Emitting never blocks; records are dropped when nobody is subscribed and
/// slow subscribers observe `RecvError::Lagged`.
pub struct EventDispatcher {
    sequence: AtomicU64,
    tx: broadcast::Sender<LoaderEventRecord>,
}

impl EventDispatcher {
    /// Create a dispatcher buffering up to `capacity` records per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sequence: AtomicU64::new(0),
            tx,
        }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEventRecord> {
        self.tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: LoaderEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let record = LoaderEventRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence,
            event,
        };
        debug!(event_id = %record.id, event = ?record.event, "Loader event");
        let _ = self.tx.send(record);
    }

    /// Number of events emitted so far
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
