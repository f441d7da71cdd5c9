//! Stage-transition event fan-out.
//!
//! A `tokio::sync::broadcast` channel delivers [`PipelineEvent`]s to every
//! currently connected observer. Publishing is fire-and-forget: no
//! subscribers, slow subscribers, and lagged subscribers never block or
//! fail the orchestrator, and there is no replay — an observer that
//! connects late reconstructs progress from the registry and the session
//! snapshot instead.

use tokio::sync::broadcast;

use crate::models::{EventData, EventKind, PipelineEvent};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Deliver to all current observers. A send error only means nobody is
    /// listening, which is fine.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn emit(&self, kind: EventKind, data: EventData) {
        self.publish(PipelineEvent::new(kind, data));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
