// Taskwave: a layered orchestrator for parallel coding agents. Schedules
// a task dependency graph into waves, runs one agent per slot in an
// isolated git worktree, coordinates through a shared status document,
// and integrates the resulting branches atomically.

// Module declarations
pub mod agents;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod git;
pub mod merge;
pub mod models;
pub mod scheduler;
pub mod session;
pub mod statusdoc;
pub mod taskdoc;
pub mod utils;
pub mod workspace;

// Re-export the types most callers need
pub use config::TaskwaveConfig;
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherState};
pub use events::{EventBus, OrchestratorEvent, SessionCommand};
pub use merge::{Conflict, MergeEngine, MergeOutcome, MergeState};
pub use models::*;
pub use session::SessionHistory;
pub use statusdoc::{StatusMonitor, StatusStore};
pub use taskdoc::TaskDocument;
