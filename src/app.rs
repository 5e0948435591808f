//! Per-application task and device registries and iteration accounting.

use hashbrown::{HashMap, HashSet};
use rand::seq::IteratorRandom;
use rand::Rng;

use crate::collective::{
    Collective, DpsAllReduce, MultiRingAllReduce, PsAllReduce, RingAllReduce,
};
use crate::config::{AllReduceStrategy, AppConfig};
use crate::device::{Device, DeviceId, DeviceKind};
use crate::error::{SimError, SimResult};
use crate::task::{Task, TaskId, TaskKind};
use crate::taskgraph::TaskGraph;
use crate::time::SimTime;
use crate::transport::DATA_PACKET_SIZE;

/// Index of an application within the engine.
pub type AppId = usize;

/// One training application: its task graph, devices, and iteration state.
///
/// The application exclusively owns its tasks and devices; tasks refer to
/// their device by id.
#[derive(Debug)]
pub struct Application {
    pub(crate) tasks: HashMap<TaskId, Task>,
    pub(crate) devices: HashMap<DeviceId, Device>,
    /// Task ids in load order; drives the deterministic spread of initial
    /// task start events.
    pub(crate) task_order: Vec<TaskId>,
    /// Pending-predecessor counts as loaded; reapplied on iteration reset.
    initial_counters: HashMap<TaskId, u32>,
    pub(crate) n_finished_tasks: usize,
    pub(crate) finished_once: bool,
    iterations: u64,
    pub(crate) final_finish_time: SimTime,
    pub(crate) first_iter_time: SimTime,
    /// Slow-start threshold in data-packet-size units.
    pub(crate) ssthresh: u64,
    pub(crate) strategy: AllReduceStrategy,
    /// Logical-to-physical node permutation applied to every flow endpoint.
    pub(crate) gpus: Vec<usize>,
    pub(crate) nnodes: usize,
    /// GPUs per node, carried from the task graph for outer drivers.
    pub ngpupernode: usize,
    /// Switch count, carried from the task graph for outer drivers.
    pub nswitches: usize,
}

impl Application {
    /// Build an application from a decoded task graph.
    ///
    /// Computes pending-predecessor counters from the successor edges,
    /// snapshots them for iteration resets, and chooses each all-reduce
    /// task's expansion: multi-ring when the graph carries ring descriptors,
    /// otherwise the configured strategy.
    pub fn from_taskgraph(graph: &TaskGraph, config: AppConfig) -> SimResult<Self> {
        if graph.tasks.is_empty() {
            return Err(SimError::InvalidTaskGraph("task graph has no tasks".into()));
        }

        let mut devices = HashMap::new();
        for spec in &graph.devices {
            let kind: DeviceKind = spec.kind.parse()?;
            devices.insert(
                DeviceId(spec.deviceid),
                Device::new(
                    kind,
                    spec.bandwidth,
                    spec.nodeid,
                    spec.gpuid,
                    spec.fromnode,
                    spec.tonode,
                    spec.fromgpu,
                    spec.togpu,
                ),
            );
        }

        for ring in &graph.rings {
            if ring.jumps.is_empty() || ring.jumps.iter().any(Vec::is_empty) {
                return Err(SimError::InvalidTaskGraph(format!(
                    "ring description for group size {} has an empty jump list",
                    ring.ringsz
                )));
            }
        }
        let selected_jumps: HashMap<usize, Vec<Vec<u32>>> = graph
            .rings
            .iter()
            .map(|ring| (ring.ringsz, ring.jumps.clone()))
            .collect();
        let multi_ring = !selected_jumps.is_empty();
        if multi_ring && graph.nnodes == 0 {
            return Err(SimError::InvalidTaskGraph(
                "multi-ring task graph requires nnodes".into(),
            ));
        }

        let span = node_span(graph);
        let gpus = match config.gpus {
            Some(gpus) => {
                if gpus.len() < span {
                    return Err(SimError::InvalidTaskGraph(format!(
                        "gpu permutation covers {} nodes but the graph references {span}",
                        gpus.len()
                    )));
                }
                gpus
            }
            // Identity permutation by default.
            None => (0..span).collect(),
        };

        let mut tasks = HashMap::new();
        let mut task_order = Vec::with_capacity(graph.tasks.len());
        for spec in &graph.tasks {
            let id = TaskId(spec.taskid);
            let kind: TaskKind = spec.kind.parse()?;
            let mut task = if kind == TaskKind::AllReduce {
                if spec.node_group.is_empty() {
                    return Err(SimError::InvalidTaskGraph(format!(
                        "all-reduce task {id} has an empty node group"
                    )));
                }
                let group = spec.node_group.clone();
                let collective = if multi_ring {
                    let jumps = selected_jumps
                        .get(&group.len())
                        .ok_or(SimError::MissingRingSpec(group.len()))?
                        .clone();
                    Collective::MultiRing(MultiRingAllReduce::new(group, jumps, spec.xfersize))
                } else {
                    match config.strategy {
                        AllReduceStrategy::Ring => {
                            Collective::Ring(RingAllReduce::new(group, spec.xfersize))
                        }
                        AllReduceStrategy::ParamServer => {
                            Collective::ParamServer(PsAllReduce::new(group, spec.xfersize))
                        }
                        AllReduceStrategy::PairShuffle => {
                            Collective::PairShuffle(DpsAllReduce::new(group, spec.xfersize))
                        }
                    }
                };
                Task::new_allreduce(id, collective, spec.xfersize, spec.runtime)
            } else {
                let device_id = DeviceId(spec.deviceid.ok_or_else(|| {
                    SimError::InvalidTaskGraph(format!("task {id} has no device binding"))
                })?);
                let device = devices.get(&device_id).ok_or(SimError::UnknownDevice {
                    task: id,
                    device: device_id,
                })?;
                let endpoints = (device.kind == DeviceKind::NwComm)
                    .then(|| (device.from_node, device.to_node));
                Task::new(id, kind, device_id, endpoints, spec.xfersize, spec.runtime)
            };
            task.next_tasks = spec.next_tasks.iter().map(|&next| TaskId(next)).collect();
            if tasks.insert(id, task).is_some() {
                return Err(SimError::InvalidTaskGraph(format!("duplicate task id {id}")));
            }
            task_order.push(id);
        }

        let mut counters: HashMap<TaskId, u32> = tasks.keys().map(|&id| (id, 0)).collect();
        for task in tasks.values() {
            for next in &task.next_tasks {
                let counter = counters.get_mut(next).ok_or(SimError::UnknownTask(*next))?;
                *counter += 1;
            }
        }
        for (id, &count) in &counters {
            if let Some(task) = tasks.get_mut(id) {
                task.counter = count;
            }
        }

        Ok(Self {
            tasks,
            devices,
            task_order,
            initial_counters: counters,
            n_finished_tasks: 0,
            finished_once: false,
            iterations: 0,
            final_finish_time: SimTime::ZERO,
            first_iter_time: SimTime::ZERO,
            ssthresh: config.ssthresh,
            strategy: config.strategy,
            gpus,
            nnodes: graph.nnodes,
            ngpupernode: graph.ngpupernode,
            nswitches: graph.nswitches,
        })
    }

    pub fn task(&self, id: TaskId) -> &Task {
        self.tasks
            .get(&id)
            .unwrap_or_else(|| panic!("unknown task {id}"))
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> &mut Task {
        self.tasks
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unknown task {id}"))
    }

    pub fn device(&self, id: DeviceId) -> &Device {
        self.devices
            .get(&id)
            .unwrap_or_else(|| panic!("unknown device {id}"))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ntasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn n_finished_tasks(&self) -> usize {
        self.n_finished_tasks
    }

    /// Whether the application has completed its first iteration.
    pub fn finished_once(&self) -> bool {
        self.finished_once
    }

    /// Completion time of the first iteration.
    pub fn first_iter_time(&self) -> SimTime {
        self.first_iter_time
    }

    /// Latest task finish time observed so far (not reset between
    /// iterations).
    pub fn final_finish_time(&self) -> SimTime {
        self.final_finish_time
    }

    /// Completed iterations.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn strategy(&self) -> AllReduceStrategy {
        self.strategy
    }

    /// Physical node behind a logical flow endpoint.
    pub(crate) fn physical(&self, node: usize) -> usize {
        *self
            .gpus
            .get(node)
            .unwrap_or_else(|| panic!("node {node} lies outside the gpu permutation"))
    }

    pub(crate) fn ssthresh_bytes(&self) -> u64 {
        self.ssthresh * DATA_PACKET_SIZE
    }

    pub(crate) fn count_iteration(&mut self) {
        self.iterations += 1;
    }

    /// Restore every task to its load-time `(state, counter)` pair for the
    /// next iteration.
    pub(crate) fn reset_tasks(&mut self) {
        self.n_finished_tasks = 0;
        for task in self.tasks.values_mut() {
            task.reset();
        }
        for (id, &count) in &self.initial_counters {
            if let Some(task) = self.tasks.get_mut(id) {
                task.counter = count;
            }
        }
    }
}

/// Uniformly sample `n` node ids from `candidates`, removing the picks from
/// the set. Used by outer drivers to place applications on disjoint GPU
/// sets.
pub fn choose_gpus<R: Rng + ?Sized>(
    candidates: &mut HashSet<usize>,
    n: usize,
    rng: &mut R,
) -> Vec<usize> {
    assert!(
        n <= candidates.len(),
        "requested {n} gpus from a pool of {}",
        candidates.len()
    );
    let picked: Vec<usize> = candidates.iter().copied().choose_multiple(rng, n);
    for node in &picked {
        candidates.remove(node);
    }
    picked
}

fn node_span(graph: &TaskGraph) -> usize {
    if graph.nnodes > 0 {
        return graph.nnodes;
    }
    let mut span = 0;
    for dev in &graph.devices {
        span = span
            .max(dev.nodeid + 1)
            .max(dev.fromnode + 1)
            .max(dev.tonode + 1);
    }
    for task in &graph.tasks {
        for &node in &task.node_group {
            span = span.max(node + 1);
        }
    }
    span
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use crate::taskgraph::{DeviceSpec, TaskSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gpu_device(id: u64) -> DeviceSpec {
        DeviceSpec {
            deviceid: id,
            kind: "DEVICE_GPU".into(),
            bandwidth: 1.0,
            nodeid: 0,
            gpuid: 0,
            fromnode: 0,
            tonode: 0,
            fromgpu: 0,
            togpu: 0,
        }
    }

    fn compute_task(id: u64, next: &[u64]) -> TaskSpec {
        TaskSpec {
            taskid: id,
            kind: "TASK_FORWARD".into(),
            deviceid: Some(0),
            xfersize: 0,
            runtime: 1e-8,
            next_tasks: next.to_vec(),
            node_group: Vec::new(),
        }
    }

    fn diamond_graph() -> TaskGraph {
        TaskGraph {
            devices: vec![gpu_device(0)],
            tasks: vec![
                compute_task(0, &[1, 2]),
                compute_task(1, &[3]),
                compute_task(2, &[3]),
                compute_task(3, &[]),
            ],
            ..TaskGraph::default()
        }
    }

    #[test]
    fn test_counters_match_indegree() {
        let app = Application::from_taskgraph(&diamond_graph(), AppConfig::default()).unwrap();
        assert_eq!(app.task(TaskId(0)).counter, 0);
        assert_eq!(app.task(TaskId(1)).counter, 1);
        assert_eq!(app.task(TaskId(2)).counter, 1);
        assert_eq!(app.task(TaskId(3)).counter, 2);
    }

    #[test]
    fn test_reset_restores_state_and_counters() {
        let mut app = Application::from_taskgraph(&diamond_graph(), AppConfig::default()).unwrap();
        for id in [0, 1, 2, 3] {
            let task = app.task_mut(TaskId(id));
            task.state = TaskState::Finished;
            task.counter = 0;
            task.finish_time = SimTime(99);
        }
        app.n_finished_tasks = 4;

        app.reset_tasks();
        assert_eq!(app.n_finished_tasks, 0);
        assert_eq!(app.task(TaskId(0)).counter, 0);
        assert_eq!(app.task(TaskId(3)).counter, 2);
        for id in [0, 1, 2, 3] {
            assert_eq!(app.task(TaskId(id)).state, TaskState::NotReady);
            assert_eq!(app.task(TaskId(id)).finish_time, SimTime::ZERO);
        }
    }

    #[test]
    fn test_unknown_successor_rejected() {
        let mut graph = diamond_graph();
        graph.tasks[3].next_tasks = vec![42];
        let err = Application::from_taskgraph(&graph, AppConfig::default());
        assert!(matches!(err, Err(SimError::UnknownTask(TaskId(42)))));
    }

    #[test]
    fn test_missing_ring_spec_rejected() {
        let mut graph = TaskGraph {
            nnodes: 4,
            tasks: vec![TaskSpec {
                taskid: 0,
                kind: "TASK_ALLREDUCE".into(),
                deviceid: None,
                xfersize: 1 << 20,
                runtime: 0.0,
                next_tasks: Vec::new(),
                node_group: vec![0, 1, 2],
            }],
            ..TaskGraph::default()
        };
        graph.rings = vec![crate::taskgraph::RingSpec {
            ringsz: 4,
            jumps: vec![vec![1]],
        }];
        let err = Application::from_taskgraph(&graph, AppConfig::default());
        assert!(matches!(err, Err(SimError::MissingRingSpec(3))));
    }

    #[test]
    fn test_identity_gpus_by_default() {
        let graph = TaskGraph {
            nnodes: 4,
            devices: vec![gpu_device(0)],
            tasks: vec![compute_task(0, &[])],
            ..TaskGraph::default()
        };
        let app = Application::from_taskgraph(&graph, AppConfig::default()).unwrap();
        assert_eq!(app.gpus, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_choose_gpus_removes_picks() {
        let mut pool: HashSet<usize> = (0..16).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let first = choose_gpus(&mut pool, 4, &mut rng);
        assert_eq!(first.len(), 4);
        assert_eq!(pool.len(), 12);
        for node in &first {
            assert!(!pool.contains(node));
        }
        let second = choose_gpus(&mut pool, 4, &mut rng);
        assert!(first.iter().all(|node| !second.contains(node)));
    }
}
