//! All-reduce expansion state.
//!
//! A single logical all-reduce task expands into a multi-round
//! micro-schedule of point-to-point flows. The four strategies are a closed
//! set held inline in the owning task and dispatched by the engine; there is
//! no open inheritance.

mod multi_ring;
mod pair_shuffle;
mod param_server;
mod ring;

pub use multi_ring::MultiRingAllReduce;
pub use pair_shuffle::DpsAllReduce;
pub use param_server::{PsAllReduce, PsDirection};
pub use ring::RingAllReduce;

/// MTU floor: a collective moving less than one MTU per peer gains nothing
/// from further rounds and short-circuits after its first.
pub(crate) const MTU_BYTES: u64 = 9000;

/// `2(n-1)/n`, the reduce-scatter/all-gather traffic multiplier.
pub(crate) fn inflation_factor(n: usize) -> f64 {
    2.0 * (n as f64 - 1.0) / n as f64
}

/// Per-variant all-reduce state.
#[derive(Debug)]
pub enum Collective {
    Ring(RingAllReduce),
    MultiRing(MultiRingAllReduce),
    ParamServer(PsAllReduce),
    PairShuffle(DpsAllReduce),
}

/// Variant tag used for dispatch without borrowing the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveKind {
    Ring,
    MultiRing,
    ParamServer,
    PairShuffle,
}

impl Collective {
    pub fn kind(&self) -> CollectiveKind {
        match self {
            Collective::Ring(_) => CollectiveKind::Ring,
            Collective::MultiRing(_) => CollectiveKind::MultiRing,
            Collective::ParamServer(_) => CollectiveKind::ParamServer,
            Collective::PairShuffle(_) => CollectiveKind::PairShuffle,
        }
    }

    /// Number of participating nodes.
    pub fn group_len(&self) -> usize {
        match self {
            Collective::Ring(state) => state.node_group.len(),
            Collective::MultiRing(state) => state.node_group.len(),
            Collective::ParamServer(state) => state.node_group.len(),
            Collective::PairShuffle(state) => state.node_group.len(),
        }
    }

    /// Rewind round state for the next iteration, restoring the
    /// pre-inflation operator size.
    pub(crate) fn rewind(&mut self) {
        match self {
            Collective::Ring(state) => state.rewind(),
            Collective::MultiRing(state) => state.rewind(),
            Collective::ParamServer(state) => state.rewind(),
            Collective::PairShuffle(state) => state.rewind(),
        }
    }
}
