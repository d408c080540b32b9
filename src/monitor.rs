//! Live call monitor — broadcast fan-out of call events to any number of
//! attached observers.
//!
//! An explicit, constructed component (passed around as `Arc<CallMonitor>`)
//! rather than process-global state. Publishing is fire-and-forget: no
//! receivers, slow receivers, or dropped receivers never affect the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Events published to live observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Connection-opened acknowledgment, sent once per attached observer.
    Connected { message: String },
    /// A digit (or digit group) was received on a call.
    Digit {
        call_id: String,
        digits: String,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    pub fn digit(call_id: impl Into<String>, digits: impl Into<String>) -> Self {
        MonitorEvent::Digit {
            call_id: call_id.into(),
            digits: digits.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast-only fan-out channel for live call events.
pub struct CallMonitor {
    tx: broadcast::Sender<MonitorEvent>,
}

impl CallMonitor {
    /// Create a monitor with the given channel capacity. Observers that lag
    /// more than `capacity` events behind skip ahead and lose the gap.
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    /// Subscribe to events published after this call. No history replay.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all observers. Fire-and-forget: a send with no
    /// receivers is not an error and never blocks.
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of currently attached observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
