//! Transport seam: congestion-controlled flows as an opaque source with a
//! completion event.
//!
//! The core has no visibility into the transport's internals. It hands over
//! a flow spec, a cloned route pair and an owned completion token; the
//! transport schedules [`Event::FlowComplete`] with that token exactly once,
//! at the sim-time of the flow's completion. Retransmission is entirely the
//! transport's concern; the core only sets the initial timeout.

use crate::events::{Event, EventList};
use crate::flow::{FlowId, FlowToken};
use crate::time::SimTime;
use crate::topology::Route;

/// Transport data packet size in bytes.
///
/// Slow-start threshold configuration is expressed in units of this.
pub const DATA_PACKET_SIZE: u64 = 1500;

/// Parameters for one point-to-point flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSpec {
    pub src: usize,
    pub dst: usize,
    /// Flow size in bytes.
    pub size: u64,
    /// Slow-start threshold in bytes.
    pub ssthresh: u64,
    /// Initial retransmission timeout.
    pub rto: SimTime,
}

/// Congestion-controlled flow source factory.
pub trait Transport {
    /// Construct the flow source/sink pair bound to `token`, apply the spec,
    /// register with the retransmission machinery, and start the flow at
    /// `start_at`.
    ///
    /// The completion contract: `Event::FlowComplete(token)` is scheduled
    /// exactly once, at the flow's completion time.
    fn connect(
        &mut self,
        events: &mut EventList,
        spec: FlowSpec,
        route_out: Route,
        route_in: Route,
        start_at: SimTime,
        token: FlowToken,
    );

    /// Transport-internal wake-up (pacing, retransmission timers).
    fn on_event(&mut self, _events: &mut EventList, _flow: FlowId) {}
}

/// Record of one launched flow, kept by [`FixedLatencyTransport`].
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub spec: FlowSpec,
    pub start_at: SimTime,
    /// Hop count of the forward route (sink terminal included).
    pub out_hops: usize,
    /// Hop count of the reverse route (source terminal included).
    pub in_hops: usize,
}

/// Deterministic transport: every flow completes a fixed latency after its
/// start time, regardless of size or contention.
///
/// Reference implementation for the completion contract and the workhorse of
/// the test suite. Flows whose start time has already passed begin at the
/// current sim-time.
#[derive(Debug)]
pub struct FixedLatencyTransport {
    latency: SimTime,
    flows: Vec<FlowRecord>,
}

impl FixedLatencyTransport {
    pub fn new(latency: SimTime) -> Self {
        Self {
            latency,
            flows: Vec::new(),
        }
    }

    /// Every flow launched so far, in launch order.
    pub fn flows(&self) -> &[FlowRecord] {
        &self.flows
    }

    /// Number of flows launched so far.
    pub fn launched(&self) -> usize {
        self.flows.len()
    }
}

impl Transport for FixedLatencyTransport {
    fn connect(
        &mut self,
        events: &mut EventList,
        spec: FlowSpec,
        route_out: Route,
        route_in: Route,
        start_at: SimTime,
        token: FlowToken,
    ) {
        let begin = start_at.max(events.now());
        self.flows.push(FlowRecord {
            spec,
            start_at: begin,
            out_hops: route_out.len(),
            in_hops: route_in.len(),
        });
        events.schedule(begin + self.latency, Event::FlowComplete(token));
    }
}
