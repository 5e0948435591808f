//! Multi-ring all-reduce with explicit jump lists.
//!
//! The operator is split across both the ring partitions and the parallel
//! rings; ring j conceptually connects node index i to
//! `(i + total_jump[j]) mod nnodes` and its routes are expanded hop by hop
//! from the topology's queue/pipe grids rather than the path catalog. Each
//! ring progresses through its rounds independently; the task finishes when
//! every ring reaches its terminus.

use tracing::debug;

use super::{inflation_factor, Collective, MTU_BYTES};
use crate::app::AppId;
use crate::engine::Engine;
use crate::flow::{FlowToken, MULTI_RING_RTO};
use crate::task::{TaskId, TaskState};
use crate::topology::{Hop, Route, Topology};
use crate::transport::{FlowSpec, Transport};

/// Multi-ring all-reduce state; round bookkeeping is held in parallel
/// per-ring vectors.
#[derive(Debug)]
pub struct MultiRingAllReduce {
    /// Ordered participant node ids.
    pub node_group: Vec<usize>,
    /// One jump list per parallel ring.
    pub jumps: Vec<Vec<u32>>,
    /// Sum of each ring's jump list.
    pub total_jump: Vec<u32>,
    /// Operator size as constructed; restored on iteration reset.
    size: u64,
    /// Working operator size; inflated in place for sub-MTU operators.
    pub operator_size: u64,
    pub curr_round: Vec<u32>,
    pub finished_curr_round: Vec<usize>,
    /// `finished_rounds[ring][peer]` must track `curr_round[ring]` exactly.
    pub finished_rounds: Vec<Vec<u32>>,
    /// Rings that reached their terminal round (or short-circuited).
    pub finished_rings: usize,
}

impl MultiRingAllReduce {
    pub fn new(node_group: Vec<usize>, jumps: Vec<Vec<u32>>, size: u64) -> Self {
        let peers = node_group.len();
        let rings = jumps.len();
        let total_jump = jumps.iter().map(|jump| jump.iter().sum()).collect();
        Self {
            node_group,
            jumps,
            total_jump,
            size,
            operator_size: size,
            curr_round: vec![0; rings],
            finished_curr_round: vec![0; rings],
            finished_rounds: vec![vec![0; peers]; rings],
            finished_rings: 0,
        }
    }

    pub fn nrings(&self) -> usize {
        self.jumps.len()
    }

    /// Total rounds per ring for a group of this size.
    pub fn total_rounds(&self) -> u32 {
        2 * (self.node_group.len() as u32 - 1)
    }

    /// Per-flow chunk size: the operator is split across ring partitions and
    /// parallel rings.
    pub fn chunk_size(&self) -> u64 {
        self.operator_size / self.node_group.len() as u64 / self.jumps.len() as u64
    }

    pub(crate) fn inflate_if_small(&mut self) {
        let n = self.node_group.len();
        if self.operator_size < MTU_BYTES * n as u64 {
            self.operator_size = (self.operator_size as f64 * inflation_factor(n)) as u64;
        }
    }

    pub(crate) fn short_circuits(&self, ring: usize) -> bool {
        let n = self.node_group.len();
        self.curr_round[ring] == 1
            && self.operator_size as f64 / inflation_factor(n) <= (MTU_BYTES * n as u64) as f64
    }

    /// Record one flow completion on `ring` for `peer`; true when that
    /// ring's current round just completed.
    pub(crate) fn flow_done(&mut self, task: TaskId, ring: usize, peer: usize) -> bool {
        assert_eq!(
            self.finished_rounds[ring][peer], self.curr_round[ring],
            "multi-ring all-reduce {task}: round counter diverged for ring {ring} peer {peer}"
        );
        self.finished_rounds[ring][peer] += 1;
        self.finished_curr_round[ring] += 1;
        if self.finished_curr_round[ring] == self.node_group.len() {
            self.curr_round[ring] += 1;
            self.finished_curr_round[ring] = 0;
            true
        } else {
            false
        }
    }

    pub(crate) fn rewind(&mut self) {
        self.operator_size = self.size;
        self.finished_rings = 0;
        for ring in 0..self.jumps.len() {
            self.curr_round[ring] = 0;
            self.finished_curr_round[ring] = 0;
            for round in &mut self.finished_rounds[ring] {
                *round = 0;
            }
        }
    }
}

enum RingOutcome {
    Terminal,
    NextRound,
}

impl<T, X> Engine<T, X>
where
    T: Topology,
    X: Transport,
{
    pub(crate) fn begin_multi_ring(&mut self, app: AppId, task: TaskId) {
        let (peers, rings) = {
            let t = self.apps[app].task(task);
            let Some(Collective::MultiRing(state)) = &t.collective else {
                panic!("task {} is not a multi-ring all-reduce", t.id);
            };
            (state.node_group.len(), state.nrings())
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
            let Some(Collective::MultiRing(state)) = &mut t.collective else {
                unreachable!()
            };
            state.inflate_if_small();
        }
        for src_idx in 0..peers {
            for ring in 0..rings {
                self.launch_multi_ring_flow(app, task, ring, src_idx, true);
            }
        }
    }

    fn launch_multi_ring_flow(
        &mut self,
        app: AppId,
        task: TaskId,
        ring: usize,
        src_idx: usize,
        first_round: bool,
    ) {
        let now = self.events.now();
        let (spec, route_out, route_in, start_at) = {
            let a = &self.apps[app];
            let t = a.task(task);
            let Some(Collective::MultiRing(state)) = &t.collective else {
                unreachable!()
            };
            let nnodes = a.nnodes;
            let jump = &state.jumps[ring];
            let total = state.total_jump[ring] as usize;
            let src = a.physical(state.node_group[src_idx]);
            // Destination is the raw terminus index; it is not remapped
            // through the gpu permutation (known sharp edge, kept).
            let dst = (src_idx + total) % nnodes;

            let mut route_out = Route::new();
            let mut curr = src_idx;
            for &step in jump {
                let from = a.physical(curr);
                let to = a.physical((curr + step as usize) % nnodes);
                let queue = self.topology.queue(from, to).unwrap_or_else(|| {
                    panic!("task {task}: no queue between nodes {from} and {to}")
                });
                let pipe = self.topology.pipe(from, to).unwrap_or_else(|| {
                    panic!("task {task}: no pipe between nodes {from} and {to}")
                });
                route_out.push_back(Hop::Queue(queue));
                route_out.push_back(Hop::Pipe(pipe));
                curr = (curr + step as usize) % nnodes;
            }
            assert_eq!(
                a.physical(curr),
                a.physical((src_idx + total) % nnodes),
                "task {task}: ring {ring} does not land on its terminus"
            );
            route_out.push_back(Hop::Sink);

            let mut route_in = Route::new();
            curr = src_idx;
            for &step in jump {
                let from = a.physical(curr);
                let to = a.physical((curr + step as usize) % nnodes);
                // Grid presence was checked on the forward walk.
                let (Some(queue), Some(pipe)) =
                    (self.topology.queue(from, to), self.topology.pipe(from, to))
                else {
                    unreachable!()
                };
                route_in.push_front(Hop::Queue(queue));
                route_in.push_front(Hop::Pipe(pipe));
                curr = (curr + step as usize) % nnodes;
            }
            route_in.push_back(Hop::Source);

            let start_at = if first_round {
                t.start_time + t.run_time
            } else {
                now
            };
            let spec = FlowSpec {
                src,
                dst,
                size: state.chunk_size(),
                ssthresh: a.ssthresh_bytes(),
                rto: MULTI_RING_RTO,
            };
            (spec, route_out, route_in, start_at)
        };
        self.connect_flow(
            spec,
            route_out,
            route_in,
            start_at,
            FlowToken::MultiRing {
                app,
                task,
                ring,
                peer: src_idx,
            },
        );
    }

    pub(crate) fn multi_ring_flow_done(
        &mut self,
        app: AppId,
        task: TaskId,
        ring: usize,
        peer: usize,
    ) {
        let now = self.events.now();
        let round_complete = {
            let t = self.apps[app].task_mut(task);
            let id = t.id;
            let Some(Collective::MultiRing(state)) = &mut t.collective else {
                panic!("flow completion for task {id} which is not a multi-ring all-reduce");
            };
            state.flow_done(id, ring, peer)
        };
        if !round_complete {
            return;
        }

        let outcome = {
            let t = self.apps[app].task(task);
            let Some(Collective::MultiRing(state)) = &t.collective else {
                unreachable!()
            };
            if state.short_circuits(ring) {
                debug!(task = %t.id, ring, "multi-ring all-reduce ring short-circuits after round 0");
                RingOutcome::Terminal
            } else if state.curr_round[ring] == state.total_rounds() {
                RingOutcome::Terminal
            } else {
                RingOutcome::NextRound
            }
        };

        match outcome {
            RingOutcome::NextRound => {
                let peers = {
                    let t = self.apps[app].task(task);
                    let Some(Collective::MultiRing(state)) = &t.collective else {
                        unreachable!()
                    };
                    state.node_group.len()
                };
                for src_idx in 0..peers {
                    self.launch_multi_ring_flow(app, task, ring, src_idx, false);
                }
            }
            RingOutcome::Terminal => {
                let all_rings_done = {
                    let t = self.apps[app].task_mut(task);
                    let Some(Collective::MultiRing(state)) = &mut t.collective else {
                        unreachable!()
                    };
                    state.finished_rings += 1;
                    state.finished_rings == state.nrings()
                };
                if all_rings_done {
                    self.apps[app].task_mut(task).finish_time = now;
                    self.complete_task(app, task);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_jump() {
        let state =
            MultiRingAllReduce::new(vec![0, 1, 2, 3], vec![vec![1, 1, 1, 1], vec![2, 2]], 1 << 20);
        assert_eq!(state.total_jump, vec![4, 4]);
        assert_eq!(state.nrings(), 2);
        assert_eq!(state.total_rounds(), 6);
    }

    #[test]
    fn test_chunk_splits_across_rings() {
        let state = MultiRingAllReduce::new(vec![0, 1, 2, 3], vec![vec![1], vec![2]], 1 << 20);
        assert_eq!(state.chunk_size(), (1 << 20) / 4 / 2);
    }

    #[test]
    fn test_rings_progress_independently() {
        let mut state = MultiRingAllReduce::new(vec![0, 1], vec![vec![1], vec![1]], 1 << 20);
        for peer in 0..2 {
            state.flow_done(TaskId(0), 0, peer);
        }
        assert_eq!(state.curr_round, vec![1, 0]);
        for peer in 0..2 {
            state.flow_done(TaskId(0), 1, peer);
        }
        assert_eq!(state.curr_round, vec![1, 1]);
    }

    #[test]
    #[should_panic(expected = "round counter diverged")]
    fn test_cross_ring_divergence_aborts() {
        let mut state = MultiRingAllReduce::new(vec![0, 1, 2], vec![vec![1], vec![2]], 1 << 20);
        state.flow_done(TaskId(0), 1, 0);
        state.flow_done(TaskId(0), 1, 0);
    }

    #[test]
    fn test_rewind() {
        let mut state = MultiRingAllReduce::new(vec![0, 1], vec![vec![1]], 4);
        state.inflate_if_small();
        state.flow_done(TaskId(0), 0, 0);
        state.flow_done(TaskId(0), 0, 1);
        state.finished_rings = 1;
        state.rewind();
        assert_eq!(state.operator_size, 4);
        assert_eq!(state.curr_round, vec![0]);
        assert_eq!(state.finished_rounds, vec![vec![0, 0]]);
        assert_eq!(state.finished_rings, 0);
    }
}
