//! Build event system for observability.
//!
//! Emits [`BuildEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (progress displays, tests, log collectors) can follow a build
//! without coupling to the scheduler.

use serde::{Deserialize, Serialize};

use pmake_types::MadeState;

/// Events emitted while a build runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BuildEvent {
    BuildStarted {
        goals: Vec<String>,
        jobs: usize,
        compat: bool,
    },
    BuildFinished {
        errors: usize,
        duration_ms: u64,
    },
    JobStarted {
        target: String,
        job: usize,
        pid: u32,
    },
    JobFinished {
        target: String,
        job: usize,
        status: String,
        duration_ms: u64,
    },
    TokenAcquired {
        target: String,
        running: usize,
    },
    TokenReleased {
        target: String,
        running: usize,
    },
    TargetMade {
        target: String,
        state: MadeState,
    },
    TargetFailed {
        target: String,
        state: MadeState,
    },
    Interrupted {
        signal: i32,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<BuildEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: BuildEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BuildEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_emitted_events() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(BuildEvent::JobStarted {
            target: "prog".into(),
            job: 0,
            pid: 42,
        });

        match rx.recv().await.unwrap() {
            BuildEvent::JobStarted { target, job, pid } => {
                assert_eq!(target, "prog");
                assert_eq!(job, 0);
                assert_eq!(pid, 42);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        let emitter = EventEmitter::new(4);
        emitter.emit(BuildEvent::Interrupted { signal: 2 });
    }

    #[test]
    fn events_serialize_with_variant_names() {
        let event = BuildEvent::TargetMade {
            target: "all".into(),
            state: MadeState::UpToDate,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"TargetMade":{"target":"all","state":"UpToDate"}}"#);
    }
}
