//! Execution-state snapshots: the environment, working directory, and
//! failing command captured for replay in a remote debugging shell.

pub mod env;
pub mod state;

pub use env::{EnvSnapshot, VarFilter};
pub use state::{ExecutionState, StateCleanupGuard, StateDir};
