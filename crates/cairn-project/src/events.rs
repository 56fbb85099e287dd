//! Workspace event system for observability.
//!
//! Emits [`WorkspaceEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, progress reporters, tests) can follow project
//! evaluation and task execution without coupling to the resolver internals.

use serde::{Deserialize, Serialize};

/// Events emitted while projects are defined and tasks run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkspaceEvent {
    ProjectDefined {
        name: String,
    },
    ProjectEvaluationStarted {
        name: String,
    },
    ProjectEvaluated {
        name: String,
        duration_ms: u64,
    },
    ProjectEvaluationFailed {
        name: String,
        error: String,
    },
    TaskStarted {
        name: String,
    },
    TaskCompleted {
        name: String,
        duration_ms: u64,
    },
    TaskSkipped {
        name: String,
    },
    TaskFailed {
        name: String,
        error: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<WorkspaceEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: WorkspaceEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkspaceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
