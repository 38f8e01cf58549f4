//! Lifecycle state of the worker.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, session not started
    #[default]
    Idle,
    /// `collectionstart` sent
    CollectionStarted,
    /// Receiving collect reports
    Collecting,
    /// Plan established, run loop not entered yet
    Ready,
    /// Executing an item
    Running,
    /// Blocked on the channel
    AwaitingCommand,
    /// `shutdown` received, draining the last item
    ShuttingDown,
    /// `workerfinished` sent
    Finished,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CollectionStarted => "collection_started",
            Self::Collecting => "collecting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::AwaitingCommand => "awaiting_command",
            Self::ShuttingDown => "shutting_down",
            Self::Finished => "finished",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Finished
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
