//! Decoded task-graph descriptions.
//!
//! Serde mirror of the JSON task-graph format: devices, tasks with
//! successor edges, and optional jump-list ring descriptors whose presence
//! selects the multi-ring all-reduce expander. Kind strings use the task
//! graph vocabulary (`DEVICE_GPU`, ..., `TASK_FORWARD`, ...).

use serde::{Deserialize, Serialize};

use crate::error::SimResult;

/// A decoded task graph for one application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    #[serde(default)]
    pub ngpupernode: usize,
    #[serde(default)]
    pub nswitches: usize,
    #[serde(default)]
    pub nnodes: usize,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    /// Jump-list ring descriptors; presence selects the multi-ring expander.
    #[serde(default)]
    pub rings: Vec<RingSpec>,
}

/// One device declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub deviceid: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub bandwidth: f64,
    #[serde(default)]
    pub nodeid: usize,
    #[serde(default)]
    pub gpuid: usize,
    #[serde(default)]
    pub fromnode: usize,
    #[serde(default)]
    pub tonode: usize,
    #[serde(default)]
    pub fromgpu: usize,
    #[serde(default)]
    pub togpu: usize,
}

/// One task declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub taskid: u64,
    #[serde(rename = "type")]
    pub kind: String,
    /// Device binding; absent for all-reduce tasks.
    #[serde(default)]
    pub deviceid: Option<u64>,
    #[serde(default)]
    pub xfersize: u64,
    /// Runtime in fractional seconds.
    #[serde(default)]
    pub runtime: f64,
    #[serde(default)]
    pub next_tasks: Vec<u64>,
    /// Participants of an all-reduce task.
    #[serde(default)]
    pub node_group: Vec<usize>,
}

/// Jump lists describing the parallel rings for one group size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingSpec {
    /// Group size these jump lists apply to.
    pub ringsz: usize,
    /// One jump list per parallel ring.
    pub jumps: Vec<Vec<u32>>,
}

impl TaskGraph {
    /// Parse the JSON flavor of the task-graph format.
    pub fn from_json(text: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_graph() {
        let graph = TaskGraph::from_json(
            r#"{
                "nnodes": 2,
                "devices": [
                    {"deviceid": 0, "type": "DEVICE_GPU", "bandwidth": 100.0, "nodeid": 0},
                    {"deviceid": 1, "type": "DEVICE_NW_COMM", "bandwidth": 12.5,
                     "fromnode": 0, "tonode": 1}
                ],
                "tasks": [
                    {"taskid": 0, "type": "TASK_FORWARD", "deviceid": 0,
                     "runtime": 1e-8, "next_tasks": [1]},
                    {"taskid": 1, "type": "TASK_COMM", "deviceid": 1,
                     "xfersize": 65536, "runtime": 0.0}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(graph.nnodes, 2);
        assert_eq!(graph.devices.len(), 2);
        assert_eq!(graph.tasks.len(), 2);
        assert_eq!(graph.tasks[0].next_tasks, vec![1]);
        assert_eq!(graph.tasks[1].xfersize, 65536);
        assert!(graph.rings.is_empty());
    }

    #[test]
    fn test_decode_ring_descriptors() {
        let graph = TaskGraph::from_json(
            r#"{
                "nnodes": 4,
                "rings": [{"ringsz": 4, "jumps": [[1, 1, 1, 1], [2, 2]]}],
                "tasks": [
                    {"taskid": 0, "type": "TASK_ALLREDUCE", "xfersize": 1048576,
                     "node_group": [0, 1, 2, 3]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(graph.rings.len(), 1);
        assert_eq!(graph.rings[0].ringsz, 4);
        assert_eq!(graph.rings[0].jumps, vec![vec![1, 1, 1, 1], vec![2, 2]]);
        assert_eq!(graph.tasks[0].node_group, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        assert!(TaskGraph::from_json("{\"tasks\": 5}").is_err());
    }
}
