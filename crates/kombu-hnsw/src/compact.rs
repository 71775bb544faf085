//! Locality compaction.
//!
//! Reorders node indices by BFS from the entry point over layer 0, so that
//! nodes explored together during a beam sit close together in the graph
//! file and the embedding blob. Topology is preserved exactly; only the
//! numbering changes. The caller must reorder every node-indexed artifact
//! (passages, offset table, embedding blob) with the returned permutation.

use crate::graph::HnswGraph;
use kombu_vector::NodeId;
use std::collections::VecDeque;

/// Compact a graph; returns the rewritten graph and the permutation as
/// `old_to_new[old] = new`.
pub fn compact(graph: HnswGraph) -> (HnswGraph, Vec<NodeId>) {
    let order = bfs_order(&graph);

    let n = graph.len();
    let mut old_to_new = vec![0 as NodeId; n];
    for (new, &old) in order.iter().enumerate() {
        old_to_new[old as usize] = new as NodeId;
    }

    let mut levels = vec![0u8; n];
    let mut links: Vec<Vec<Vec<NodeId>>> = vec![Vec::new(); n];
    for old in 0..n {
        let new = old_to_new[old] as usize;
        levels[new] = graph.levels[old];
        // Adjacency stays in the same (distance-sorted) order; only the ids
        // are renamed.
        links[new] = graph.links[old]
            .iter()
            .map(|list| list.iter().map(|&nb| old_to_new[nb as usize]).collect())
            .collect();
    }

    let compacted = HnswGraph {
        m: graph.m,
        entry_point: old_to_new[graph.entry_point as usize],
        levels,
        links,
    };

    tracing::debug!(nodes = n, "graph compacted");
    (compacted, old_to_new)
}

/// BFS visit order from the entry point over layer 0; unreachable nodes are
/// appended in ascending index order so the permutation is total.
fn bfs_order(graph: &HnswGraph) -> Vec<NodeId> {
    let n = graph.len();
    let mut order = Vec::with_capacity(n);
    let mut seen = vec![false; n];

    let mut queue = VecDeque::new();
    queue.push_back(graph.entry_point);
    seen[graph.entry_point as usize] = true;

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &nb in graph.neighbors(node, 0) {
            if !seen[nb as usize] {
                seen[nb as usize] = true;
                queue.push_back(nb);
            }
        }
    }

    for node in 0..n as NodeId {
        if !seen[node as usize] {
            order.push(node);
        }
    }

    order
}
