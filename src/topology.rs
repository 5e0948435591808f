//! Topology surface consumed by the flow launcher.
//!
//! The core never builds or mutates topologies; it clones enumerated paths
//! from the catalog and, for the multi-ring expander, reads the per-link
//! queue/pipe grids directly.

use std::collections::VecDeque;

use hashbrown::HashMap;

/// Queue (switch buffer) link identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub usize);

/// Pipe (propagation delay) link identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(pub usize);

/// One element of a route handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    Queue(QueueId),
    Pipe(PipeId),
    /// Flow sink terminal, appended to forward routes.
    Sink,
    /// Flow source terminal, appended to reverse routes.
    Source,
}

/// Ordered sequence of link endpoints terminated by a sink or source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    hops: VecDeque<Hop>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, hop: Hop) {
        self.hops.push_back(hop);
    }

    pub fn push_front(&mut self, hop: Hop) {
        self.hops.push_front(hop);
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn hops(&self) -> impl Iterator<Item = &Hop> {
        self.hops.iter()
    }
}

/// Path catalog and link grids.
pub trait Topology {
    /// Number of end nodes.
    fn nnodes(&self) -> usize;

    /// Enumerated candidate routes from `src` to `dst`.
    ///
    /// The launcher clones one chosen path; the catalog is never mutated.
    fn paths(&self, src: usize, dst: usize) -> &[Route];

    /// Direct queue link from `from` to `to`, if one exists.
    fn queue(&self, from: usize, to: usize) -> Option<QueueId>;

    /// Direct pipe link from `from` to `to`, if one exists.
    fn pipe(&self, from: usize, to: usize) -> Option<PipeId>;
}

/// Fully-meshed single-hop topology.
///
/// Minimal catalog used by the test suite and as a reference for the grid
/// contract the multi-ring expander depends on: every ordered node pair has
/// one queue, one pipe, and one enumerated path crossing both.
#[derive(Debug)]
pub struct FlatTopology {
    nnodes: usize,
    paths: HashMap<(usize, usize), Vec<Route>>,
    queues: Vec<Vec<Option<QueueId>>>,
    pipes: Vec<Vec<Option<PipeId>>>,
}

impl FlatTopology {
    pub fn full_mesh(nnodes: usize) -> Self {
        let mut paths = HashMap::new();
        let mut queues = vec![vec![None; nnodes]; nnodes];
        let mut pipes = vec![vec![None; nnodes]; nnodes];
        let mut next_link = 0;

        for a in 0..nnodes {
            for b in 0..nnodes {
                if a == b {
                    continue;
                }
                let queue = QueueId(next_link);
                let pipe = PipeId(next_link);
                next_link += 1;
                queues[a][b] = Some(queue);
                pipes[a][b] = Some(pipe);

                let mut route = Route::new();
                route.push_back(Hop::Queue(queue));
                route.push_back(Hop::Pipe(pipe));
                paths.insert((a, b), vec![route]);
            }
        }

        Self {
            nnodes,
            paths,
            queues,
            pipes,
        }
    }
}

impl Topology for FlatTopology {
    fn nnodes(&self) -> usize {
        self.nnodes
    }

    fn paths(&self, src: usize, dst: usize) -> &[Route] {
        self.paths
            .get(&(src, dst))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn queue(&self, from: usize, to: usize) -> Option<QueueId> {
        self.queues.get(from)?.get(to).copied().flatten()
    }

    fn pipe(&self, from: usize, to: usize) -> Option<PipeId> {
        self.pipes.get(from)?.get(to).copied().flatten()
    }
}
