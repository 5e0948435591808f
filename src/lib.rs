//! Discrete-event simulator core for distributed deep-learning training
//! workloads over a clustered network.
//!
//! Given a static task graph describing per-device computation and
//! communication dependencies for one training iteration, a set of all-reduce
//! collective operations with a choice of expansion strategy, and a topology
//! handing out congestion-controlled flows, the [`engine::Engine`] advances
//! simulated time until every task of every registered application has
//! completed, then repeats the iteration or terminates.
//!
//! The crate provides:
//! - a dependency-tracked, device-serialized task scheduler,
//! - four all-reduce expanders (ring, multi-ring with explicit jump lists,
//!   parameter-server, dense pair-shuffle) with a small-message short-circuit,
//! - the narrow token contract feeding flow completions back into the
//!   scheduler,
//! - consumed-interface traits for the topology and the transport, with
//!   minimal deterministic implementations for tests and reference use.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod app;
pub mod collective;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod flow;
pub mod task;
pub mod taskgraph;
pub mod time;
pub mod topology;
pub mod transport;

pub use app::{choose_gpus, AppId, Application};
pub use config::{AllReduceStrategy, AppConfig};
pub use device::{Device, DeviceId, DeviceKind, DeviceState};
pub use engine::Engine;
pub use error::{SimError, SimResult};
pub use events::{Event, EventList};
pub use flow::{FlowId, FlowToken};
pub use task::{Task, TaskId, TaskKind, TaskState};
pub use taskgraph::{DeviceSpec, RingSpec, TaskGraph, TaskSpec};
pub use time::SimTime;
pub use topology::{FlatTopology, Hop, PipeId, QueueId, Route, Topology};
pub use transport::{FixedLatencyTransport, FlowSpec, Transport, DATA_PACKET_SIZE};
