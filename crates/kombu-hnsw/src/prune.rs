//! Occlusion-based edge pruning.
//!
//! Drops edges already "covered" by a closer neighbor: an edge `n -> c` is
//! removed when some kept neighbor `s` is both closer to `n` than `c` is,
//! and closer to `c` than `n` is (scaled by `threshold`). Search can still
//! reach `c` through `s`, so the recall cost is small while the graph file
//! shrinks.

use crate::graph::HnswGraph;
use kombu_vector::{Metric, NodeId, SliceSource};

/// Prune occluded edges in place.
///
/// `threshold` scales the occlusion test: `d(s, c) < threshold * d(n, c)`.
/// At 1.0 this is the classic test; larger values prune more aggressively.
/// Every node keeps at least one edge per populated layer. Returns the
/// number of directed edges removed.
pub fn prune_edges(
    graph: &mut HnswGraph,
    vectors: &SliceSource<'_>,
    metric: Metric,
    threshold: f32,
) -> usize {
    let mut removed = 0usize;

    for node in 0..graph.len() as NodeId {
        for layer in 0..graph.links[node as usize].len() {
            let list = &graph.links[node as usize][layer];
            if list.len() <= 1 {
                continue;
            }

            // Lists are sorted ascending by distance from `node`, so every
            // candidate only needs checking against earlier (closer) keeps.
            let mut kept: Vec<NodeId> = Vec::with_capacity(list.len());
            for &cand in list {
                let d_nc = metric.distance(vectors.row(node), vectors.row(cand));
                let occluded = kept.iter().any(|&s| {
                    let d_ns = metric.distance(vectors.row(node), vectors.row(s));
                    let d_sc = metric.distance(vectors.row(s), vectors.row(cand));
                    d_ns < d_nc && d_sc < threshold * d_nc
                });
                if occluded {
                    removed += 1;
                } else {
                    kept.push(cand);
                }
            }
            graph.links[node as usize][layer] = kept;
        }
    }

    tracing::debug!(removed, "graph edges pruned");
    removed
}
