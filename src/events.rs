//! In-process broadcast bus for progress and terminal events.
//!
//! Emission is best-effort by design: a failed send (no live subscribers)
//! is logged at trace level and discarded, never surfaced to the caller.

use crate::model::BuildStage;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    BuildProgress {
        build_id: String,
        site_id: String,
        stage: BuildStage,
        percent: u8,
        message: String,
    },
    BuildPublished {
        build_id: String,
        tenant_id: String,
        site_id: String,
        artifact_url: String,
    },
    TenantFrozen {
        tenant_id: String,
        affected: u64,
    },
    TenantUnfrozen {
        tenant_id: String,
        affected: u64,
    },
}

impl Event {
    /// Routing name of the event as exposed to collaborators.
    pub fn name(&self) -> &'static str {
        match self {
            Event::BuildProgress { .. } => "build.progress",
            Event::BuildPublished { .. } => "build.published",
            Event::TenantFrozen { .. } => "tenant.frozen",
            Event::TenantUnfrozen { .. } => "tenant.unfrozen",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Fire-and-forget emit; a missing subscriber is not an error.
    pub fn emit(&self, event: Event) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            trace!(event = name, "event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
