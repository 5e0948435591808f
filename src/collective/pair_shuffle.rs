//! Dense pair-shuffle all-reduce.
//!
//! Two rounds; each launches one `size/n` flow for every ordered pair of
//! distinct group members.

use super::Collective;
use crate::app::AppId;
use crate::engine::Engine;
use crate::flow::{FlowToken, COLLECTIVE_RTO};
use crate::task::{TaskId, TaskState};
use crate::topology::Topology;
use crate::transport::{FlowSpec, Transport};

/// Dense pair-shuffle state. Flows of a round are interchangeable, so only
/// the aggregate completion count is tracked.
#[derive(Debug)]
pub struct DpsAllReduce {
    /// Ordered participant node ids.
    pub node_group: Vec<usize>,
    /// Operator size; operators smaller than one chunk per node are floored
    /// to the group size.
    pub operator_size: u64,
    pub curr_round: u32,
    pub finished_curr_round: usize,
}

impl DpsAllReduce {
    pub fn new(node_group: Vec<usize>, size: u64) -> Self {
        let n = node_group.len() as u64;
        let size = if size / n > 0 { size } else { n };
        Self {
            node_group,
            operator_size: size,
            curr_round: 0,
            finished_curr_round: 0,
        }
    }

    /// Per-flow chunk size.
    pub fn chunk_size(&self) -> u64 {
        self.operator_size / self.node_group.len() as u64
    }

    /// Flows per round: one per ordered pair.
    pub fn flows_per_round(&self) -> usize {
        let n = self.node_group.len();
        n * (n - 1)
    }

    /// Record one flow completion; true when the round just completed.
    pub(crate) fn flow_done(&mut self) -> bool {
        self.finished_curr_round += 1;
        if self.finished_curr_round == self.flows_per_round() {
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
    }
}

impl<T, X> Engine<T, X>
where
    T: Topology,
    X: Transport,
{
    pub(crate) fn begin_pair_shuffle(&mut self, app: AppId, task: TaskId) {
        let peers = {
            let t = self.apps[app].task(task);
            let Some(Collective::PairShuffle(state)) = &t.collective else {
                panic!("task {} is not a pair-shuffle all-reduce", t.id);
            };
            assert_eq!(
                state.curr_round, 0,
                "pair-shuffle all-reduce {} started twice",
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
        self.launch_pair_shuffle_round(app, task, true);
    }

    fn launch_pair_shuffle_round(&mut self, app: AppId, task: TaskId, first_round: bool) {
        let (group, chunk, ssthresh, start_at) = {
            let a = &self.apps[app];
            let t = a.task(task);
            let Some(Collective::PairShuffle(state)) = &t.collective else {
                unreachable!()
            };
            let start_at = if first_round {
                t.start_time
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
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let (src, dst) = {
                    let a = &self.apps[app];
                    (a.physical(group[i]), a.physical(group[j]))
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
                    FlowToken::PairShuffle { app, task },
                );
            }
        }
    }

    pub(crate) fn dps_flow_done(&mut self, app: AppId, task: TaskId) {
        let now = self.events.now();
        let round_complete = {
            let t = self.apps[app].task_mut(task);
            let id = t.id;
            let Some(Collective::PairShuffle(state)) = &mut t.collective else {
                panic!("flow completion for task {id} which is not a pair-shuffle all-reduce");
            };
            state.flow_done()
        };
        if !round_complete {
            return;
        }

        let finished = {
            let t = self.apps[app].task(task);
            let Some(Collective::PairShuffle(state)) = &t.collective else {
                unreachable!()
            };
            state.curr_round == 2
        };
        if finished {
            self.apps[app].task_mut(task).finish_time = now;
            self.complete_task(app, task);
        } else {
            self.launch_pair_shuffle_round(app, task, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_floor() {
        let state = DpsAllReduce::new(vec![0, 1, 2], 2);
        assert_eq!(state.operator_size, 3);
        let state = DpsAllReduce::new(vec![0, 1, 2], 9000);
        assert_eq!(state.operator_size, 9000);
        assert_eq!(state.chunk_size(), 3000);
    }

    #[test]
    fn test_round_completes_after_all_pairs() {
        let mut state = DpsAllReduce::new(vec![0, 1, 2], 9000);
        assert_eq!(state.flows_per_round(), 6);
        for flow in 0..6 {
            assert_eq!(state.flow_done(), flow == 5);
        }
        assert_eq!(state.curr_round, 1);
    }
}
