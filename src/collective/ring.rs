//! Logical-ring all-reduce.
//!
//! `2(n-1)` rounds over an ordered node group; in each round every node
//! sends one `size/n` chunk to its ring successor and the round completes
//! when all `n` flows land. Sub-MTU operators are inflated to account for
//! the missing reduce-scatter/all-gather decomposition and short-circuit
//! after the first round.

use tracing::debug;

use super::{inflation_factor, Collective, MTU_BYTES};
use crate::app::AppId;
use crate::engine::Engine;
use crate::flow::{FlowToken, COLLECTIVE_RTO};
use crate::task::{TaskId, TaskState};
use crate::topology::Topology;
use crate::transport::{FlowSpec, Transport};

/// Ring all-reduce state, inline in the owning task.
#[derive(Debug)]
pub struct RingAllReduce {
    /// Ordered participant node ids.
    pub node_group: Vec<usize>,
    /// Operator size as constructed; restored on iteration reset.
    size: u64,
    /// Working operator size; inflated in place for sub-MTU operators.
    pub operator_size: u64,
    pub curr_round: u32,
    pub finished_curr_round: usize,
    /// Per-peer completed-round counters; must track `curr_round` exactly.
    pub finished_rounds: Vec<u32>,
}

impl RingAllReduce {
    /// Build ring state; operators smaller than one chunk per node are
    /// floored to the group size.
    pub fn new(node_group: Vec<usize>, size: u64) -> Self {
        let n = node_group.len() as u64;
        let size = if size / n > 0 { size } else { n };
        let peers = node_group.len();
        Self {
            node_group,
            size,
            operator_size: size,
            curr_round: 0,
            finished_curr_round: 0,
            finished_rounds: vec![0; peers],
        }
    }

    /// Total rounds for a group of this size.
    pub fn total_rounds(&self) -> u32 {
        2 * (self.node_group.len() as u32 - 1)
    }

    /// Per-flow chunk size.
    pub fn chunk_size(&self) -> u64 {
        self.operator_size / self.node_group.len() as u64
    }

    pub(crate) fn inflate_if_small(&mut self) {
        let n = self.node_group.len();
        if self.operator_size < MTU_BYTES * n as u64 {
            self.operator_size = (self.operator_size as f64 * inflation_factor(n)) as u64;
        }
    }

    /// Whether the post-round-0 short-circuit applies: deflating the working
    /// size back below one MTU per peer means the remaining rounds are
    /// unnecessary at this size.
    pub(crate) fn short_circuits(&self) -> bool {
        let n = self.node_group.len();
        self.curr_round == 1
            && self.operator_size as f64 / inflation_factor(n) <= (MTU_BYTES * n as u64) as f64
    }

    /// Record one flow completion for `peer`; true when the current round
    /// just completed.
    pub(crate) fn flow_done(&mut self, task: TaskId, peer: usize) -> bool {
        assert_eq!(
            self.finished_rounds[peer], self.curr_round,
            "ring all-reduce {task}: round counter diverged for peer {peer}"
        );
        self.finished_rounds[peer] += 1;
        self.finished_curr_round += 1;
        if self.finished_curr_round == self.node_group.len() {
            self.curr_round += 1;
            self.finished_curr_round = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn rewind(&mut self) {
        self.operator_size = self.size;
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
    pub(crate) fn begin_ring(&mut self, app: AppId, task: TaskId) {
        let peers = {
            let t = self.apps[app].task(task);
            let Some(Collective::Ring(state)) = &t.collective else {
                panic!("task {} is not a ring all-reduce", t.id);
            };
            assert_eq!(state.curr_round, 0, "ring all-reduce {} started twice", t.id);
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
            let Some(Collective::Ring(state)) = &mut t.collective else {
                unreachable!()
            };
            state.inflate_if_small();
        }
        self.launch_ring_round(app, task, true);
    }

    fn launch_ring_round(&mut self, app: AppId, task: TaskId, first_round: bool) {
        let (group, chunk, ssthresh, start_at) = {
            let a = &self.apps[app];
            let t = a.task(task);
            let Some(Collective::Ring(state)) = &t.collective else {
                unreachable!()
            };
            // The first round waits out the local compute; later rounds fire
            // as soon as the previous round drains.
            let start_at = if first_round {
                t.start_time + t.run_time
            } else {
                self.events.now()
            };
            (
                state.node_group.clone(),
                state.chunk_size(),
                a.ssthresh_bytes(),
                start_at,
            )
        };

        let n = group.len();
        for peer in 0..n {
            let (src, dst) = {
                let a = &self.apps[app];
                (a.physical(group[peer]), a.physical(group[(peer + 1) % n]))
            };
            self.launch_flow(
                FlowSpec {
                    src,
                    dst,
                    size: chunk,
                    ssthresh,
                    rto: COLLECTIVE_RTO,
                },
                start_at,
                FlowToken::Ring { app, task, peer },
            );
        }
    }

    pub(crate) fn ring_flow_done(&mut self, app: AppId, task: TaskId, peer: usize) {
        let now = self.events.now();
        let round_complete = {
            let t = self.apps[app].task_mut(task);
            let id = t.id;
            let Some(Collective::Ring(state)) = &mut t.collective else {
                panic!("flow completion for task {id} which is not a ring all-reduce");
            };
            state.flow_done(id, peer)
        };
        if !round_complete {
            return;
        }

        let finished = {
            let t = self.apps[app].task(task);
            let Some(Collective::Ring(state)) = &t.collective else {
                unreachable!()
            };
            if state.short_circuits() {
                debug!(task = %t.id, "ring all-reduce short-circuits after round 0");
                true
            } else {
                state.curr_round == state.total_rounds()
            }
        };

        if finished {
            self.apps[app].task_mut(task).finish_time = now;
            self.complete_task(app, task);
        } else {
            self.launch_ring_round(app, task, false);
        }
    }
}
