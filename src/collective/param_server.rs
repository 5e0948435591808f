//! Parameter-server all-reduce.
//!
//! Two rounds around the first group member: every worker pushes the full
//! operator to the server, then the server pushes it back to every worker.

use super::Collective;
use crate::app::AppId;
use crate::engine::Engine;
use crate::flow::{FlowToken, COLLECTIVE_RTO};
use crate::task::{TaskId, TaskState};
use crate::topology::Topology;
use crate::transport::{FlowSpec, Transport};

/// Direction of one parameter-server leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsDirection {
    /// Round 0: worker to server.
    ToServer,
    /// Round 1: server to worker.
    ToWorker,
}

/// Parameter-server all-reduce state.
#[derive(Debug)]
pub struct PsAllReduce {
    /// Ordered participant node ids; the server is the first member.
    pub node_group: Vec<usize>,
    /// Server node id.
    pub server: usize,
    /// Operator size in bytes; each leg carries the whole operator.
    pub operator_size: u64,
    pub curr_round: u32,
    pub finished_curr_round: usize,
    /// Per-node completed-round counters; must track `curr_round` exactly.
    pub finished_rounds: Vec<u32>,
}

impl PsAllReduce {
    /// Build parameter-server state; the server is always `node_group[0]`.
    pub fn new(node_group: Vec<usize>, size: u64) -> Self {
        let server = node_group[0];
        let peers = node_group.len();
        Self {
            node_group,
            server,
            operator_size: size,
            curr_round: 0,
            finished_curr_round: 0,
            finished_rounds: vec![0; peers],
        }
    }

    /// Record one flow completion for the worker at `node_idx`; true when
    /// the current round just completed (`n - 1` legs).
    pub(crate) fn flow_done(&mut self, task: TaskId, node_idx: usize) -> bool {
        assert_eq!(
            self.finished_rounds[node_idx], self.curr_round,
            "parameter-server all-reduce {task}: round counter diverged for node {node_idx}"
        );
        self.finished_rounds[node_idx] += 1;
        self.finished_curr_round += 1;
        if self.finished_curr_round == self.node_group.len() - 1 {
            self.curr_round += 1;
            self.finished_curr_round = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn rewind(&mut self) {
        self.curr_round = 0;
        self.finished_curr_round = 0;
        for round in &mut self.finished_rounds {
            *round = 0;
        }
    }
}

impl<T, X> Engine<T, X>
where
    T: Topology,
    X: Transport,
{
    pub(crate) fn begin_param_server(&mut self, app: AppId, task: TaskId) {
        let peers = {
            let t = self.apps[app].task(task);
            let Some(Collective::ParamServer(state)) = &t.collective else {
                panic!("task {} is not a parameter-server all-reduce", t.id);
            };
            assert_eq!(
                state.curr_round, 0,
                "parameter-server all-reduce {} started twice",
                t.id
            );
            state.node_group.len()
        };

        if peers == 1 {
            let t = self.apps[app].task_mut(task);
            t.start_time = t.ready_time;
            t.finish_time = t.ready_time;
            self.complete_task(app, task);
            return;
        }

        {
            let t = self.apps[app].task_mut(task);
            t.start_time = t.ready_time;
            t.state = TaskState::Running;
        }
        self.launch_ps_round(app, task, PsDirection::ToServer);
    }

    fn launch_ps_round(&mut self, app: AppId, task: TaskId, direction: PsDirection) {
        let (group, server, size, ssthresh, start_at) = {
            let a = &self.apps[app];
            let t = a.task(task);
            let Some(Collective::ParamServer(state)) = &t.collective else {
                unreachable!()
            };
            let start_at = match direction {
                PsDirection::ToServer => t.start_time,
                PsDirection::ToWorker => self.events.now(),
            };
            (
                state.node_group.clone(),
                state.server,
                state.operator_size,
                a.ssthresh_bytes(),
                start_at,
            )
        };

        for (node_idx, &node) in group.iter().enumerate() {
            if node == server {
                continue;
            }
            let (src, dst) = {
                let a = &self.apps[app];
                match direction {
                    PsDirection::ToServer => (a.physical(node), a.physical(server)),
                    PsDirection::ToWorker => (a.physical(server), a.physical(node)),
                }
            };
            self.launch_flow(
                FlowSpec {
                    src,
                    dst,
                    size,
                    ssthresh,
                    rto: COLLECTIVE_RTO,
                },
                start_at,
                FlowToken::ParamServer {
                    app,
                    task,
                    node_idx,
                    direction,
                },
            );
        }
    }

    pub(crate) fn ps_flow_done(&mut self, app: AppId, task: TaskId, node_idx: usize) {
        let now = self.events.now();
        let round_complete = {
            let t = self.apps[app].task_mut(task);
            let id = t.id;
            let Some(Collective::ParamServer(state)) = &mut t.collective else {
                panic!("flow completion for task {id} which is not a parameter-server all-reduce");
            };
            state.flow_done(id, node_idx)
        };
        if !round_complete {
            return;
        }

        let finished = {
            let t = self.apps[app].task(task);
            let Some(Collective::ParamServer(state)) = &t.collective else {
                unreachable!()
            };
            state.curr_round == 2
        };
        if finished {
            self.apps[app].task_mut(task).finish_time = now;
            self.complete_task(app, task);
        } else {
            self.launch_ps_round(app, task, PsDirection::ToWorker);
        }
    }
}
