//! Beam search over a persisted Vamana graph.
//!
//! Single-layer analogue of the HNSW beam: start at the medoid, expand the
//! closest unvisited candidate, stop when the frontier cannot improve the
//! result set. Embeddings come through the caller's [`VectorSource`]; the
//! fetch is the only suspension point.

use crate::file::VamanaFile;
use crate::Result;
use kombu_vector::{
    validate_vector, Interrupt, Metric, Neighbor, NodeId, SearchOutcome, VectorError, VectorSource,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Search the graph for the `k` nearest neighbors of `query`.
///
/// `l_search` bounds the beam (clamped up to `k`).
pub fn search(
    file: &VamanaFile,
    source: &mut dyn VectorSource,
    query: &[f32],
    metric: Metric,
    k: usize,
    l_search: usize,
) -> Result<SearchOutcome> {
    validate_vector(query, source.dimension())?;

    let dim = source.dimension();
    let mut dropped = 0usize;
    let mut visited: HashSet<NodeId> = HashSet::new();

    let outcome = |neighbors, interrupt, dropped| SearchOutcome {
        neighbors,
        interrupt,
        dropped,
    };

    if k == 0 {
        return Ok(outcome(Vec::new(), None, 0));
    }

    let l = l_search.max(k);
    let entry = file.entry_point();
    visited.insert(entry);

    let entry_batch = match source.fetch(&[entry]) {
        Ok(batch) => batch,
        Err(VectorError::Cancelled) => {
            return Ok(outcome(Vec::new(), Some(Interrupt::Cancelled), 0));
        }
        Err(VectorError::DeadlineExceeded) => {
            return Ok(outcome(Vec::new(), Some(Interrupt::DeadlineExceeded), 0));
        }
        Err(err) => return Err(err.into()),
    };
    let Some((_, entry_vec)) = entry_batch.iter(dim).next() else {
        return Ok(outcome(Vec::new(), None, 1));
    };
    let start = Neighbor::new(entry, metric.distance(query, entry_vec));

    let mut frontier: BinaryHeap<Reverse<Neighbor>> = BinaryHeap::new();
    let mut results: BinaryHeap<Neighbor> = BinaryHeap::new();
    frontier.push(Reverse(start));
    results.push(start);

    while let Some(Reverse(current)) = frontier.pop() {
        if results.len() >= l {
            if let Some(worst) = results.peek() {
                if current.distance > worst.distance {
                    break;
                }
            }
        }

        let unvisited: Vec<NodeId> = file
            .neighbors(current.node)?
            .into_iter()
            .filter(|nb| visited.insert(*nb))
            .collect();
        if unvisited.is_empty() {
            continue;
        }

        let batch = match source.fetch(&unvisited) {
            Ok(batch) => batch,
            Err(VectorError::Cancelled) => {
                return Ok(outcome(Vec::new(), Some(Interrupt::Cancelled), dropped));
            }
            Err(VectorError::DeadlineExceeded) => {
                let beam = drain_top_k(results, k);
                return Ok(outcome(beam, Some(Interrupt::DeadlineExceeded), dropped));
            }
            Err(err) => return Err(err.into()),
        };
        dropped += unvisited.len() - batch.nodes.len();

        for (node, vector) in batch.iter(dim) {
            let dist = metric.distance(query, vector);
            let should_add =
                results.len() < l || results.peek().map(|w| dist < w.distance).unwrap_or(true);
            if should_add {
                let cand = Neighbor::new(node, dist);
                frontier.push(Reverse(cand));
                results.push(cand);
                while results.len() > l {
                    results.pop();
                }
            }
        }
    }

    Ok(outcome(drain_top_k(results, k), None, dropped))
}

fn drain_top_k(results: BinaryHeap<Neighbor>, k: usize) -> Vec<Neighbor> {
    let mut all: Vec<_> = results.into_iter().collect();
    all.sort();
    all.truncate(k);
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_graph;
    use crate::file::{write_graph, VamanaFile};
    use crate::VamanaParams;
    use kombu_vector::{brute_force_top_k, SliceSource};
    use tempfile::tempdir;

    fn pseudo_random_vectors(n: usize, dim: usize) -> Vec<f32> {
        let mut state = 0xB5AD_4ECE_DA1C_E2A9u64;
        (0..n * dim)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 33) as f32) / (u32::MAX >> 1) as f32
            })
            .collect()
    }

    #[test]
    fn test_search_matches_brute_force() {
        let dim = 8;
        let n = 400;
        let data = pseudo_random_vectors(n, dim);
        let source = SliceSource::new(&data, dim);
        let params = VamanaParams {
            r: 24,
            l_build: 64,
            alpha: 1.2,
            num_passes: 2,
            seed: 13,
            metric: Metric::L2,
        };
        let graph = build_graph(&source, &params, &mut |_, _| {}).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("v.graph");
        write_graph(&graph, &path).unwrap();
        let file = VamanaFile::open(&path).unwrap();

        let query: Vec<f32> = data[17 * dim..18 * dim].to_vec();
        let mut search_source = SliceSource::new(&data, dim);
        let outcome = search(&file, &mut search_source, &query, Metric::L2, 10, 64).unwrap();
        assert!(outcome.interrupt.is_none());
        assert_eq!(outcome.neighbors.len(), 10);
        assert_eq!(outcome.neighbors[0].node, 17);

        let candidates: Vec<NodeId> = (0..n as NodeId).collect();
        let mut oracle = SliceSource::new(&data, dim);
        let exact = brute_force_top_k(&mut oracle, &query, Metric::L2, &candidates, 10, 64).unwrap();
        let got: HashSet<_> = outcome.neighbors.iter().map(|r| r.node).collect();
        let hits = exact.iter().filter(|e| got.contains(&e.node)).count();
        assert!(hits >= 8, "recall@10 too low: {}/10", hits);
    }

    #[test]
    fn test_k_zero() {
        let dim = 4;
        let data = pseudo_random_vectors(30, dim);
        let source = SliceSource::new(&data, dim);
        let params = VamanaParams {
            r: 8,
            l_build: 16,
            alpha: 1.2,
            num_passes: 1,
            seed: 1,
            metric: Metric::L2,
        };
        let graph = build_graph(&source, &params, &mut |_, _| {}).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("v.graph");
        write_graph(&graph, &path).unwrap();
        let file = VamanaFile::open(&path).unwrap();

        let mut s = SliceSource::new(&data, dim);
        let outcome = search(&file, &mut s, &[0.0; 4], Metric::L2, 0, 16).unwrap();
        assert!(outcome.neighbors.is_empty());
    }
}
