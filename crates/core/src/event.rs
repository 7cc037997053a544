//! Domain event system: decoupled observation of the agent loop.
//!
//! Events are published when something interesting happens in a request.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::trace::StepOutcome;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user message entered the loop
    RequestStarted {
        session_id: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A model output was decoded (or rejected)
    DecisionDecoded {
        session_id: String,
        iteration: u32,
        kind: String,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was dispatched and recorded
    ToolExecuted {
        session_id: String,
        tool_name: String,
        outcome: StepOutcome,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The model answered and the request completed
    ResponseGenerated {
        session_id: String,
        model: String,
        tokens_used: u32,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// A request was aborted
    RequestAborted {
        session_id: String,
        kind: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A session was removed from the store
    SessionEvicted {
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
