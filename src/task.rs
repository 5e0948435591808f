//! Tasks of one training iteration.

use std::fmt;
use std::str::FromStr;

use crate::collective::Collective;
use crate::device::DeviceId;
use crate::error::SimError;
use crate::time::SimTime;

/// Task identifier from the task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task classes appearing in task graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Forward,
    Backward,
    Comm,
    Update,
    Barrier,
    AllReduce,
}

impl FromStr for TaskKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, SimError> {
        match s {
            "TASK_FORWARD" => Ok(Self::Forward),
            "TASK_BACKWARD" => Ok(Self::Backward),
            "TASK_COMM" | "TASK_NOMINAL_COMM" => Ok(Self::Comm),
            "TASK_UPDATE" => Ok(Self::Update),
            "TASK_BARRIER" => Ok(Self::Barrier),
            "TASK_ALLREDUCE" => Ok(Self::AllReduce),
            other => Err(SimError::UnknownTaskKind(other.to_string())),
        }
    }
}

/// Lifecycle states.
///
/// Progression is monotone (NotReady, Ready, Running, Finished); only the
/// iteration reset returns a task to NotReady.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotReady,
    Ready,
    Running,
    Finished,
}

/// One node of the task graph.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Bound device; all-reduce tasks have none.
    pub device: Option<DeviceId>,
    /// Inline all-reduce state; present iff `kind` is `AllReduce`.
    pub collective: Option<Collective>,
    /// Nominal runtime (task-graph seconds scaled at load).
    pub run_time: SimTime,
    /// Transfer size in bytes.
    pub xfersize: u64,
    /// Successor task ids.
    pub next_tasks: Vec<TaskId>,
    /// Pending-predecessor counter.
    pub counter: u32,
    pub state: TaskState,
    pub ready_time: SimTime,
    pub start_time: SimTime,
    pub finish_time: SimTime,
    /// Flow source endpoint for network communication tasks.
    pub src_node: Option<usize>,
    /// Flow destination endpoint for network communication tasks.
    pub dst_node: Option<usize>,
}

impl Task {
    /// Build an ordinary (device-bound) task.
    ///
    /// `endpoints` carries the `(from_node, to_node)` pair of a network
    /// communication device, `None` for every other binding.
    pub fn new(
        id: TaskId,
        kind: TaskKind,
        device: DeviceId,
        endpoints: Option<(usize, usize)>,
        xfersize: u64,
        runtime_secs: f64,
    ) -> Self {
        Self {
            id,
            kind,
            device: Some(device),
            collective: None,
            run_time: SimTime::from_runtime_secs(runtime_secs),
            xfersize,
            next_tasks: Vec::new(),
            counter: 0,
            state: TaskState::NotReady,
            ready_time: SimTime::ZERO,
            start_time: SimTime::ZERO,
            finish_time: SimTime::ZERO,
            src_node: endpoints.map(|(src, _)| src),
            dst_node: endpoints.map(|(_, dst)| dst),
        }
    }

    /// Build an all-reduce task with its expansion state inline.
    pub fn new_allreduce(
        id: TaskId,
        collective: Collective,
        xfersize: u64,
        runtime_secs: f64,
    ) -> Self {
        Self {
            id,
            kind: TaskKind::AllReduce,
            device: None,
            collective: Some(collective),
            run_time: SimTime::from_runtime_secs(runtime_secs),
            xfersize,
            next_tasks: Vec::new(),
            counter: 0,
            state: TaskState::NotReady,
            ready_time: SimTime::ZERO,
            start_time: SimTime::ZERO,
            finish_time: SimTime::ZERO,
            src_node: None,
            dst_node: None,
        }
    }

    /// Restore load-time state for the next iteration.
    ///
    /// The pending-predecessor counter is reapplied from the application's
    /// snapshot afterwards.
    pub(crate) fn reset(&mut self) {
        self.state = TaskState::NotReady;
        self.counter = 0;
        self.ready_time = SimTime::ZERO;
        self.start_time = SimTime::ZERO;
        self.finish_time = SimTime::ZERO;
        if let Some(collective) = &mut self.collective {
            collective.rewind();
        }
    }
}
