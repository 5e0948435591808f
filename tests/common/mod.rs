//! Shared fixtures for the integration suites.

use flowsim::{
    AppConfig, Application, DeviceSpec, Engine, FixedLatencyTransport, FlatTopology, SimTime,
    TaskGraph, TaskSpec,
};

/// Opt-in log output while running the suite (`RUST_LOG=debug cargo test`).
#[allow(dead_code)]
pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A runtime of `units` sim-time ticks, expressed in task-graph seconds.
pub fn secs(units: u64) -> f64 {
    units as f64 * 1e-9
}

pub fn gpu_device(id: u64, node: usize) -> DeviceSpec {
    DeviceSpec {
        deviceid: id,
        kind: "DEVICE_GPU".into(),
        bandwidth: 100.0,
        nodeid: node,
        gpuid: 0,
        fromnode: 0,
        tonode: 0,
        fromgpu: 0,
        togpu: 0,
    }
}

#[allow(dead_code)]
pub fn nw_device(id: u64, from: usize, to: usize) -> DeviceSpec {
    DeviceSpec {
        deviceid: id,
        kind: "DEVICE_NW_COMM".into(),
        bandwidth: 12.5,
        nodeid: 0,
        gpuid: 0,
        fromnode: from,
        tonode: to,
        fromgpu: 0,
        togpu: 0,
    }
}

pub fn compute(id: u64, device: u64, runtime_units: u64, next: &[u64]) -> TaskSpec {
    TaskSpec {
        taskid: id,
        kind: "TASK_FORWARD".into(),
        deviceid: Some(device),
        xfersize: 0,
        runtime: secs(runtime_units),
        next_tasks: next.to_vec(),
        node_group: Vec::new(),
    }
}

#[allow(dead_code)]
pub fn comm(id: u64, device: u64, xfersize: u64, next: &[u64]) -> TaskSpec {
    TaskSpec {
        taskid: id,
        kind: "TASK_COMM".into(),
        deviceid: Some(device),
        xfersize,
        runtime: 0.0,
        next_tasks: next.to_vec(),
        node_group: Vec::new(),
    }
}

#[allow(dead_code)]
pub fn allreduce(id: u64, group: &[usize], size: u64, runtime_units: u64) -> TaskSpec {
    TaskSpec {
        taskid: id,
        kind: "TASK_ALLREDUCE".into(),
        deviceid: None,
        xfersize: size,
        runtime: secs(runtime_units),
        next_tasks: Vec::new(),
        node_group: group.to_vec(),
    }
}

/// A chain of compute tasks on one device: task k runs `runtimes[k]` ticks
/// and releases task k + 1.
pub fn chain_app(runtimes: &[u64]) -> Application {
    let tasks = runtimes
        .iter()
        .enumerate()
        .map(|(k, &units)| {
            let next: &[u64] = if k + 1 < runtimes.len() {
                &[k as u64 + 1]
            } else {
                &[]
            };
            compute(k as u64, 0, units, next)
        })
        .collect();
    let graph = TaskGraph {
        devices: vec![gpu_device(0, 0)],
        tasks,
        ..TaskGraph::default()
    };
    Application::from_taskgraph(&graph, AppConfig::default()).unwrap()
}

/// An all-reduce application over `group` with the given config.
#[allow(dead_code)]
pub fn allreduce_app(
    nnodes: usize,
    group: &[usize],
    size: u64,
    runtime_units: u64,
    config: AppConfig,
) -> Application {
    let graph = TaskGraph {
        nnodes,
        tasks: vec![allreduce(0, group, size, runtime_units)],
        ..TaskGraph::default()
    };
    Application::from_taskgraph(&graph, config).unwrap()
}

/// Full-mesh engine with a fixed-latency transport.
pub fn engine(nnodes: usize, latency: u64) -> Engine<FlatTopology, FixedLatencyTransport> {
    Engine::new(
        FlatTopology::full_mesh(nnodes),
        FixedLatencyTransport::new(SimTime(latency)),
        42,
    )
}
