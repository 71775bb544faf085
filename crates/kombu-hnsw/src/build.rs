//! Graph construction.
//!
//! Offline batch build: embeddings for all `N` nodes are resident for the
//! duration (the engine stages them in a temp blob or a transient buffer),
//! and nodes are inserted in index order `0..N` so that a fixed layer seed
//! yields a reproducible graph.

use crate::graph::HnswGraph;
use crate::layer::LevelGenerator;
use crate::{HnswError, HnswParams, Result};
use kombu_vector::{Metric, Neighbor, NodeId, SliceSource};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Build an HNSW graph over `vectors` (row `i` = node `i`).
///
/// `on_progress(done, total)` fires after every insertion.
pub fn build_graph(
    vectors: &SliceSource<'_>,
    params: &HnswParams,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<HnswGraph> {
    let n = vectors.len();
    if n == 0 {
        return Err(HnswError::Build("cannot build over zero vectors".into()));
    }
    if params.m < 2 {
        return Err(HnswError::Build(format!("M must be at least 2, got {}", params.m)));
    }

    let mut levels = LevelGenerator::new(params.m, params.max_layers, params.seed);
    let mut state = BuildState {
        vectors,
        metric: params.metric,
        ef_construction: params.ef_construction.max(params.m),
        graph: HnswGraph {
            m: params.m as u32,
            entry_point: 0,
            levels: Vec::with_capacity(n),
            links: Vec::with_capacity(n),
        },
    };

    for node in 0..n as NodeId {
        state.insert(node, levels.draw());
        on_progress(node as usize + 1, n);
    }

    tracing::debug!(
        nodes = n,
        layers = state.graph.num_layers(),
        edges = state.graph.edge_count(),
        "hnsw graph built"
    );

    Ok(state.graph)
}

struct BuildState<'a> {
    vectors: &'a SliceSource<'a>,
    metric: Metric,
    ef_construction: usize,
    graph: HnswGraph,
}

impl BuildState<'_> {
    fn distance(&self, a: NodeId, b: NodeId) -> f32 {
        self.metric.distance(self.vectors.row(a), self.vectors.row(b))
    }

    fn distance_to(&self, query: &[f32], node: NodeId) -> f32 {
        self.metric.distance(query, self.vectors.row(node))
    }

    fn insert(&mut self, node: NodeId, level: usize) {
        let query = self.vectors.row(node);

        if self.graph.is_empty() {
            self.graph.entry_point = node;
            self.graph.levels.push(level as u8);
            self.graph.links.push(vec![Vec::new(); level + 1]);
            return;
        }

        let top = self.graph.num_layers() - 1;
        self.graph.levels.push(level as u8);
        self.graph.links.push(vec![Vec::new(); level + 1]);

        // Greedy 1-best descent through the layers above the new node.
        let entry = self.graph.entry_point;
        let mut eps = vec![Neighbor::new(entry, self.distance_to(query, entry))];
        for layer in ((level + 1)..=top).rev() {
            eps = self.search_layer(query, eps, 1, layer, node);
        }

        // Beam search and connect from min(level, top) down to 0.
        for layer in (0..=level.min(top)).rev() {
            let candidates = self.search_layer(query, eps.clone(), self.ef_construction, layer, node);
            let bound = self.graph.max_degree(layer);
            let selected = self.select_heuristic(&candidates, bound);

            self.graph.links[node as usize][layer] =
                selected.iter().map(|c| c.node).collect();

            for &chosen in &selected {
                self.link_back(chosen.node, node, layer);
            }

            eps = candidates;
        }

        if level > top {
            self.graph.entry_point = node;
        }
    }

    /// Beam search within one layer over resident vectors.
    ///
    /// `exclude` is the node being inserted; it is already present in the
    /// adjacency arrays but must not link to itself.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: Vec<Neighbor>,
        ef: usize,
        layer: usize,
        exclude: NodeId,
    ) -> Vec<Neighbor> {
        let mut frontier: BinaryHeap<Reverse<Neighbor>> = BinaryHeap::new();
        let mut results: BinaryHeap<Neighbor> = BinaryHeap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(exclude);

        for ep in entry_points {
            if visited.insert(ep.node) {
                frontier.push(Reverse(ep));
                results.push(ep);
            }
        }

        while let Some(Reverse(current)) = frontier.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.distance > worst.distance {
                        break;
                    }
                }
            }

            for &nb in self.graph.neighbors(current.node, layer) {
                if !visited.insert(nb) {
                    continue;
                }
                let dist = self.distance_to(query, nb);
                let should_add = results.len() < ef
                    || results.peek().map(|w| dist < w.distance).unwrap_or(true);
                if should_add {
                    let cand = Neighbor::new(nb, dist);
                    frontier.push(Reverse(cand));
                    results.push(cand);
                    while results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<_> = results.into_iter().collect();
        out.sort();
        out
    }

    /// Heuristic neighbor selection: walk candidates in ascending distance
    /// from the query and keep one only if it is closer to the query than to
    /// every neighbor kept so far. Keeps the edge set spread out instead of
    /// clustered.
    fn select_heuristic(&self, candidates: &[Neighbor], limit: usize) -> Vec<Neighbor> {
        let mut selected: Vec<Neighbor> = Vec::with_capacity(limit);
        for &cand in candidates {
            if selected.len() >= limit {
                break;
            }
            let occluded = selected
                .iter()
                .any(|s| self.distance(cand.node, s.node) < cand.distance);
            if !occluded {
                selected.push(cand);
            }
        }
        selected
    }

    /// Add the reverse edge `from -> new`, keeping `from`'s list sorted by
    /// distance and within its degree bound.
    fn link_back(&mut self, from: NodeId, new: NodeId, layer: usize) {
        let bound = self.graph.max_degree(layer);

        let mut scored: Vec<Neighbor> = self.graph.links[from as usize][layer]
            .iter()
            .map(|&nb| Neighbor::new(nb, self.distance(from, nb)))
            .collect();
        if scored.iter().any(|c| c.node == new) {
            return;
        }
        scored.push(Neighbor::new(new, self.distance(from, new)));
        scored.sort();

        let kept = if scored.len() > bound {
            self.select_heuristic(&scored, bound)
        } else {
            scored
        };
        self.graph.links[from as usize][layer] = kept.into_iter().map(|c| c.node).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kombu_vector::SliceSource;

    fn grid_vectors(n: usize) -> Vec<f32> {
        // Points along a line so nearest neighbors are unambiguous.
        (0..n).flat_map(|i| [i as f32, 0.0, 0.0]).collect()
    }

    fn params() -> HnswParams {
        HnswParams {
            m: 4,
            ef_construction: 32,
            max_layers: 8,
            seed: 42,
            metric: Metric::L2,
        }
    }

    #[test]
    fn test_build_satisfies_invariants() {
        let data = grid_vectors(200);
        let source = SliceSource::new(&data, 3);
        let graph = build_graph(&source, &params(), &mut |_, _| {}).unwrap();

        assert_eq!(graph.len(), 200);
        graph.check_invariants().unwrap();
    }

    #[test]
    fn test_adjacency_sorted_by_distance() {
        let data = grid_vectors(100);
        let source = SliceSource::new(&data, 3);
        let graph = build_graph(&source, &params(), &mut |_, _| {}).unwrap();

        for node in 0..graph.len() as NodeId {
            let list = graph.neighbors(node, 0);
            let dists: Vec<f32> = list
                .iter()
                .map(|&nb| {
                    Metric::L2.distance(source.row(node), source.row(nb))
                })
                .collect();
            for w in dists.windows(2) {
                assert!(w[0] <= w[1], "node {} adjacency not sorted", node);
            }
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let data: Vec<f32> = Vec::new();
        let source = SliceSource::new(&data, 3);
        assert!(matches!(
            build_graph(&source, &params(), &mut |_, _| {}),
            Err(HnswError::Build(_))
        ));
    }

    #[test]
    fn test_single_node() {
        let data = vec![1.0, 0.0, 0.0];
        let source = SliceSource::new(&data, 3);
        let graph = build_graph(&source, &params(), &mut |_, _| {}).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.entry_point, 0);
        graph.check_invariants().unwrap();
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let data = grid_vectors(150);
        let source = SliceSource::new(&data, 3);
        let a = build_graph(&source, &params(), &mut |_, _| {}).unwrap();
        let b = build_graph(&source, &params(), &mut |_, _| {}).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_progress_reported() {
        let data = grid_vectors(10);
        let source = SliceSource::new(&data, 3);
        let mut calls = Vec::new();
        build_graph(&source, &params(), &mut |done, total| calls.push((done, total))).unwrap();
        assert_eq!(calls.len(), 10);
        assert_eq!(calls.last(), Some(&(10, 10)));
    }
}
