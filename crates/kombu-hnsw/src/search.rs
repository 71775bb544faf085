//! Beam search over a persisted graph.
//!
//! The search owns no embeddings: every vector it needs is pulled through
//! the caller's [`VectorSource`]. Between fetches it is pure CPU; the fetch
//! is the single suspension point, and the only place a source can signal
//! cancellation or a deadline.

use crate::file::HnswFile;
use crate::Result;
use kombu_vector::{
    validate_vector, Interrupt, Metric, Neighbor, NodeId, SearchOutcome, VectorError, VectorSource,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Search the graph for the `k` nearest neighbors of `query`.
///
/// `ef_search` bounds the beam (clamped up to `k`). Nodes the source omits
/// are treated as visited-but-dead: never scored, never expanded.
pub fn search(
    file: &HnswFile,
    source: &mut dyn VectorSource,
    query: &[f32],
    metric: Metric,
    k: usize,
    ef_search: usize,
) -> Result<SearchOutcome> {
    validate_vector(query, source.dimension())?;

    let mut state = SearchState {
        metric,
        dim: source.dimension(),
        visited: HashSet::new(),
        dropped: 0,
    };

    if k == 0 {
        return Ok(state.finish(Vec::new(), None));
    }

    let entry = file.entry_point();
    let entry_scored = match state.fetch_scored(source, query, &[entry]) {
        Ok(scored) => scored,
        Err(FetchStop::Interrupt(i)) => return Ok(state.finish(Vec::new(), Some(i))),
        Err(FetchStop::Failed(err)) => return Err(err.into()),
    };
    let mut current = match entry_scored.get(&entry) {
        Some(&d) => Neighbor::new(entry, d),
        // Entry point unavailable: nothing is reachable.
        None => return Ok(state.finish(Vec::new(), None)),
    };

    // Greedy 1-best descent through the upper layers.
    for layer in (1..file.num_layers()).rev() {
        loop {
            let unvisited: Vec<NodeId> = file
                .neighbors(current.node, layer)?
                .into_iter()
                .filter(|nb| !state.visited.contains(nb))
                .collect();
            if unvisited.is_empty() {
                break;
            }
            let scored = match state.fetch_scored(source, query, &unvisited) {
                Ok(scored) => scored,
                Err(FetchStop::Interrupt(Interrupt::Cancelled)) => {
                    return Ok(state.finish(Vec::new(), Some(Interrupt::Cancelled)));
                }
                Err(FetchStop::Interrupt(Interrupt::DeadlineExceeded)) => {
                    return Ok(state.finish(vec![current], Some(Interrupt::DeadlineExceeded)));
                }
                Err(FetchStop::Failed(err)) => return Err(err.into()),
            };

            let mut improved = false;
            for (&node, &dist) in &scored {
                if dist < current.distance {
                    current = Neighbor::new(node, dist);
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
    }

    // Beam at layer 0.
    let ef = ef_search.max(k);
    let mut frontier: BinaryHeap<Reverse<Neighbor>> = BinaryHeap::new();
    let mut results: BinaryHeap<Neighbor> = BinaryHeap::new();
    frontier.push(Reverse(current));
    results.push(current);

    while let Some(Reverse(cand)) = frontier.pop() {
        if results.len() >= ef {
            if let Some(worst) = results.peek() {
                if cand.distance > worst.distance {
                    break;
                }
            }
        }

        let unvisited: Vec<NodeId> = file
            .neighbors(cand.node, 0)?
            .into_iter()
            .filter(|nb| !state.visited.contains(nb))
            .collect();
        if unvisited.is_empty() {
            continue;
        }

        let scored = match state.fetch_scored(source, query, &unvisited) {
            Ok(scored) => scored,
            Err(FetchStop::Interrupt(Interrupt::Cancelled)) => {
                return Ok(state.finish(Vec::new(), Some(Interrupt::Cancelled)));
            }
            Err(FetchStop::Interrupt(Interrupt::DeadlineExceeded)) => {
                let beam = drain_top_k(results, k);
                return Ok(state.finish(beam, Some(Interrupt::DeadlineExceeded)));
            }
            Err(FetchStop::Failed(err)) => return Err(err.into()),
        };

        // All neighbors from a batch are applied before the next pop, so
        // results are independent of provider timing.
        for (&node, &dist) in &scored {
            let should_add =
                results.len() < ef || results.peek().map(|w| dist < w.distance).unwrap_or(true);
            if should_add {
                let nb = Neighbor::new(node, dist);
                frontier.push(Reverse(nb));
                results.push(nb);
                while results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let neighbors = drain_top_k(results, k);
    Ok(state.finish(neighbors, None))
}

fn drain_top_k(results: BinaryHeap<Neighbor>, k: usize) -> Vec<Neighbor> {
    let mut all: Vec<_> = results.into_iter().collect();
    all.sort();
    all.truncate(k);
    all
}

enum FetchStop {
    Interrupt(Interrupt),
    Failed(VectorError),
}

struct SearchState {
    metric: Metric,
    dim: usize,
    visited: HashSet<NodeId>,
    dropped: usize,
}

impl SearchState {
    /// Fetch embeddings for `nodes`, marking all of them visited and scoring
    /// the ones the source returned. Interruptions come back as `Err` so
    /// call sites can unwind the beam; any other source failure is fatal and
    /// propagates as a panic-free hard error through the `?` in `search`.
    fn fetch_scored(
        &mut self,
        source: &mut dyn VectorSource,
        query: &[f32],
        nodes: &[NodeId],
    ) -> std::result::Result<HashMap<NodeId, f32>, FetchStop> {
        for &n in nodes {
            self.visited.insert(n);
        }
        let batch = match source.fetch(nodes) {
            Ok(batch) => batch,
            Err(VectorError::Cancelled) => return Err(FetchStop::Interrupt(Interrupt::Cancelled)),
            Err(VectorError::DeadlineExceeded) => {
                return Err(FetchStop::Interrupt(Interrupt::DeadlineExceeded))
            }
            Err(err) => return Err(FetchStop::Failed(err)),
        };
        // Omitted nodes were filtered out or their embedding batch was
        // dropped by the source; they stay visited and unscored.
        self.dropped += nodes.len() - batch.nodes.len();

        let mut scored = HashMap::with_capacity(batch.nodes.len());
        for (node, vector) in batch.iter(self.dim) {
            scored.insert(node, self.metric.distance(query, vector));
        }
        Ok(scored)
    }

    fn finish(&mut self, neighbors: Vec<Neighbor>, interrupt: Option<Interrupt>) -> SearchOutcome {
        SearchOutcome {
            neighbors,
            interrupt,
            dropped: self.dropped,
        }
    }
}
