//! Compute and communication devices.

use std::fmt;
use std::str::FromStr;

use crate::error::SimError;
use crate::time::SimTime;

/// Device identifier from the task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device classes appearing in task graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Gpu,
    Cpu,
    GpuComm,
    DramComm,
    NwComm,
}

impl FromStr for DeviceKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, SimError> {
        match s {
            "DEVICE_GPU" => Ok(Self::Gpu),
            "DEVICE_CPU" => Ok(Self::Cpu),
            "DEVICE_GPU_COMM" => Ok(Self::GpuComm),
            "DEVICE_DRAM_COMM" => Ok(Self::DramComm),
            "DEVICE_NW_COMM" => Ok(Self::NwComm),
            other => Err(SimError::UnknownDeviceKind(other.to_string())),
        }
    }
}

/// Busy/idle serialization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Busy,
}

/// One device of an application: at most one task runs on it at a time.
#[derive(Debug, Clone)]
pub struct Device {
    pub kind: DeviceKind,
    /// Bandwidth in bits per second (raw input scaled at load).
    pub bandwidth: u64,
    pub state: DeviceState,
    /// Sim-time at which the device next becomes idle.
    pub busy_up_to: SimTime,
    pub node_id: usize,
    pub gpu_id: usize,
    pub from_node: usize,
    pub to_node: usize,
    pub from_gpu: usize,
    pub to_gpu: usize,
}

impl Device {
    /// Build a device; `bandwidth` is the raw task-graph value, scaled by
    /// 8 * 1000 at load.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: DeviceKind,
        bandwidth: f64,
        node_id: usize,
        gpu_id: usize,
        from_node: usize,
        to_node: usize,
        from_gpu: usize,
        to_gpu: usize,
    ) -> Self {
        Self {
            kind,
            bandwidth: (bandwidth * 8.0 * 1000.0) as u64,
            state: DeviceState::Idle,
            busy_up_to: SimTime::ZERO,
            node_id,
            gpu_id,
            from_node,
            to_node,
            from_gpu,
            to_gpu,
        }
    }
}
