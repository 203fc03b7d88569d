//! Event bus for pipeline notifications
//!
//! The EventBus provides a pub/sub pattern for observers of the acquisition
//! pipeline (progress bars, audit logs, metrics exporters). It uses bounded
//! channels to prevent unbounded memory growth and supports both specific
//! event subscriptions and global "All" subscriptions.
//!
//! Publishing is synchronous and never waits: a subscriber whose queue is
//! full misses the event, and subscribers that dropped their receiver are
//! pruned on the next publish. A slow observer therefore cannot stall a
//! transfer.

use parking_lot::Mutex;
use sdk::validation::{ReputationLevel, ValidationLevel};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::downloader::DownloadProgress;
use crate::orchestrator::RequestState;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Event types that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    DownloadStarted,
    DownloadProgress,
    DownloadCompleted,
    DownloadFailed,
    DiscoveryProgress,
    DiscoveryCompleted,
    SourceValidated,
    ReputationChanged,
    LoadStateChanged,
    LoadCompleted,
    /// Subscribe to all event types
    All,
}

/// Events published by the pipeline
#[derive(Debug, Clone)]
pub enum Event {
    /// A new transfer began for a cache key
    DownloadStarted { key: String, url: String },
    /// Bytes arrived for a transfer
    DownloadProgress {
        key: String,
        progress: DownloadProgress,
    },
    /// A transfer committed its artifact
    DownloadCompleted { key: String, bytes: u64 },
    /// A transfer ended without an artifact
    DownloadFailed { key: String, error: String },
    /// One source of a discovery finished
    DiscoveryProgress {
        operation_id: String,
        source_id: String,
        completed: usize,
        total: usize,
        percentage: f64,
    },
    /// A discovery finished
    DiscoveryCompleted {
        operation_id: String,
        results: usize,
        failed_sources: usize,
        duration: Duration,
    },
    /// A source verdict was computed (not emitted for cached verdicts)
    SourceValidated {
        source_id: String,
        level: ValidationLevel,
    },
    /// A source crossed a reputation band
    ReputationChanged {
        source_id: String,
        old_level: ReputationLevel,
        new_level: ReputationLevel,
    },
    /// A load request moved to a new state
    LoadStateChanged {
        operation_id: String,
        state: RequestState,
    },
    /// A load request reached a terminal state
    LoadCompleted {
        operation_id: String,
        source_id: String,
        state: RequestState,
        error: Option<String>,
    },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::DownloadStarted { .. } => EventType::DownloadStarted,
            Event::DownloadProgress { .. } => EventType::DownloadProgress,
            Event::DownloadCompleted { .. } => EventType::DownloadCompleted,
            Event::DownloadFailed { .. } => EventType::DownloadFailed,
            Event::DiscoveryProgress { .. } => EventType::DiscoveryProgress,
            Event::DiscoveryCompleted { .. } => EventType::DiscoveryCompleted,
            Event::SourceValidated { .. } => EventType::SourceValidated,
            Event::ReputationChanged { .. } => EventType::ReputationChanged,
            Event::LoadStateChanged { .. } => EventType::LoadStateChanged,
            Event::LoadCompleted { .. } => EventType::LoadCompleted,
        }
    }
}

/// Pub/sub hub shared by every pipeline component
pub struct EventBus {
    /// Map of event types to lists of subscribers
    channels: Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a specific event type, or `EventType::All`
    pub fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        self.channels.lock().entry(event_type).or_default().push(tx);
        rx
    }

    /// Publish an event to the matching and the "All" subscribers
    pub fn publish(&self, event: Event) {
        let event_type = event.event_type();
        let mut channels = self.channels.lock();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => true,
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Number of live subscribers across all event types
    pub fn subscriber_count(&self) -> usize {
        self.channels
            .lock()
            .values()
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
