//! Flow launch and completion tokens.
//!
//! A flow is launched by cloning one randomly chosen path in each direction
//! from the topology's catalog, appending the sink/source terminals, and
//! handing the pair to the transport together with an owned completion
//! token. The token comes back in the completion event and carries every
//! index its handler needs.

use tracing::trace;

use rand::Rng;

use crate::app::AppId;
use crate::collective::PsDirection;
use crate::engine::Engine;
use crate::task::TaskId;
use crate::time::SimTime;
use crate::topology::{Hop, Route, Topology};
use crate::transport::{FlowSpec, Transport};

/// Transport-assigned flow identifier for internal wake-ups.
pub type FlowId = u64;

/// Retransmission timeout for standalone communication tasks.
pub(crate) const COMM_RTO: SimTime = SimTime::from_ms(10);

/// Retransmission timeout for all-reduce micro-flows.
pub(crate) const COLLECTIVE_RTO: SimTime = SimTime::from_ms(1);

/// The multi-ring expander keeps the standalone timeout.
pub(crate) const MULTI_RING_RTO: SimTime = SimTime::from_ms(10);

/// Completion token for an in-flight flow.
///
/// Ownership transfers to the transport at launch and returns in the
/// completion event; the event queue owning the token makes leaks
/// structurally impossible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowToken {
    /// Standalone communication task.
    Comm { app: AppId, task: TaskId },
    /// Ring all-reduce flow from `peer` to its ring successor.
    Ring {
        app: AppId,
        task: TaskId,
        peer: usize,
    },
    /// Multi-ring all-reduce flow on `ring` from `peer`.
    MultiRing {
        app: AppId,
        task: TaskId,
        ring: usize,
        peer: usize,
    },
    /// Parameter-server leg for the worker at `node_idx`.
    ParamServer {
        app: AppId,
        task: TaskId,
        node_idx: usize,
        direction: PsDirection,
    },
    /// Dense pair-shuffle flow; flows of a round are interchangeable.
    PairShuffle { app: AppId, task: TaskId },
}

impl<T, X> Engine<T, X>
where
    T: Topology,
    X: Transport,
{
    /// Launch a flow along randomly chosen catalog paths.
    pub(crate) fn launch_flow(&mut self, spec: FlowSpec, start_at: SimTime, token: FlowToken) {
        let route_out = {
            let paths = self.topology.paths(spec.src, spec.dst);
            assert!(
                !paths.is_empty(),
                "no path from node {} to node {}",
                spec.src,
                spec.dst
            );
            let choice = self.rng.gen_range(0..paths.len());
            let mut route = paths[choice].clone();
            route.push_back(Hop::Sink);
            route
        };
        let route_in = {
            let paths = self.topology.paths(spec.dst, spec.src);
            assert!(
                !paths.is_empty(),
                "no path from node {} to node {}",
                spec.dst,
                spec.src
            );
            let choice = self.rng.gen_range(0..paths.len());
            let mut route = paths[choice].clone();
            route.push_back(Hop::Source);
            route
        };
        self.connect_flow(spec, route_out, route_in, start_at, token);
    }

    /// Hand prebuilt routes to the transport.
    pub(crate) fn connect_flow(
        &mut self,
        spec: FlowSpec,
        route_out: Route,
        route_in: Route,
        start_at: SimTime,
        token: FlowToken,
    ) {
        trace!(
            src = spec.src,
            dst = spec.dst,
            size = spec.size,
            start = %start_at,
            "launching flow"
        );
        self.transport
            .connect(&mut self.events, spec, route_out, route_in, start_at, token);
    }

    /// Start the flow of a standalone communication task.
    pub(crate) fn launch_comm_flow(&mut self, app: AppId, task: TaskId) {
        let (spec, start_at) = {
            let a = &self.apps[app];
            let t = a.task(task);
            let (Some(src), Some(dst)) = (t.src_node, t.dst_node) else {
                panic!("communication task {} has no network endpoints", t.id);
            };
            (
                FlowSpec {
                    src: a.physical(src),
                    dst: a.physical(dst),
                    size: t.xfersize,
                    ssthresh: a.ssthresh_bytes(),
                    rto: COMM_RTO,
                },
                t.ready_time,
            )
        };
        {
            let t = self.apps[app].task_mut(task);
            t.start_time = t.ready_time;
        }
        self.launch_flow(spec, start_at, FlowToken::Comm { app, task });
    }

    /// Completion of a standalone communication task's flow.
    pub(crate) fn comm_flow_done(&mut self, app: AppId, task: TaskId) {
        let now = self.events.now();
        {
            let t = self.apps[app].task_mut(task);
            t.finish_time = now;
            // The measured flow completion time replaces the nominal runtime.
            t.run_time = t.finish_time - t.start_time;
        }
        self.complete_task(app, task);
    }
}
