//! Error types for simulator loading.
//!
//! Only load-time faults are recoverable `Err` values. Scheduler invariant
//! violations during a run are programmer errors and abort with a diagnostic
//! identifying the task.

use thiserror::Error;

use crate::device::DeviceId;
use crate::task::TaskId;

/// Result type for simulator loading operations.
pub type SimResult<T> = Result<T, SimError>;

/// Load-time errors raised while building an application from a task graph.
#[derive(Debug, Error)]
pub enum SimError {
    /// Unknown device kind string in the task-graph input.
    #[error("unsupported device type `{0}`")]
    UnknownDeviceKind(String),

    /// Unknown task kind string in the task-graph input.
    #[error("unsupported task type `{0}`")]
    UnknownTaskKind(String),

    /// A task is bound to a device id the graph never declared.
    #[error("task {task} is bound to unknown device {device}")]
    UnknownDevice { task: TaskId, device: DeviceId },

    /// A successor edge names a task id the graph never declared.
    #[error("edge references unknown task {0}")]
    UnknownTask(TaskId),

    /// The graph selects the multi-ring expander but carries no jump lists
    /// for this group size.
    #[error("no ring description for group size {0}")]
    MissingRingSpec(usize),

    /// Structurally invalid task graph.
    #[error("invalid task graph: {0}")]
    InvalidTaskGraph(String),

    /// Malformed task-graph input.
    #[error("failed to parse task graph: {0}")]
    Parse(#[from] serde_json::Error),
}
