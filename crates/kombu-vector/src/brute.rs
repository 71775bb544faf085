//! Brute-force exact top-k over an explicit candidate set.
//!
//! Linear scan through a [`VectorSource`]. Used by the searcher when a
//! metadata filter is so selective that graph traversal would mostly visit
//! excluded nodes, and by tests as the ground-truth oracle for recall checks.

use crate::distance::Metric;
use crate::traits::{Neighbor, NodeId, VectorSource};
use crate::{validate_vector, Result};
use std::collections::BinaryHeap;

/// Exact top-k nearest neighbors of `query` among `candidates`.
///
/// Embeddings are pulled through `source` in chunks of `batch` nodes, so a
/// recompute-backed source sees the same batching it would during graph
/// search. Nodes the source omits are silently skipped. Results are sorted
/// ascending by distance, ties by node index.
pub fn brute_force_top_k(
    source: &mut dyn VectorSource,
    query: &[f32],
    metric: Metric,
    candidates: &[NodeId],
    k: usize,
    batch: usize,
) -> Result<Vec<Neighbor>> {
    validate_vector(query, source.dimension())?;

    if k == 0 || candidates.is_empty() {
        return Ok(Vec::new());
    }

    let dim = source.dimension();
    let batch = batch.max(1);

    // Max-heap of the k best so far; the root is the current worst.
    let mut best: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);

    for chunk in candidates.chunks(batch) {
        let fetched = source.fetch(chunk)?;
        for (node, vector) in fetched.iter(dim) {
            let distance = metric.distance(query, vector);
            let candidate = Neighbor::new(node, distance);
            if best.len() < k {
                best.push(candidate);
            } else if let Some(worst) = best.peek() {
                if candidate < *worst {
                    best.push(candidate);
                    best.pop();
                }
            }
        }
    }

    let mut results: Vec<_> = best.into_iter().collect();
    results.sort();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SliceSource;

    fn line_source(n: usize) -> Vec<f32> {
        // Node i at position (i, 0).
        (0..n).flat_map(|i| [i as f32, 0.0]).collect()
    }

    #[test]
    fn test_exact_top_k() {
        let data = line_source(20);
        let mut source = SliceSource::new(&data, 2);
        let candidates: Vec<NodeId> = (0..20).collect();

        let results =
            brute_force_top_k(&mut source, &[5.0, 0.0], Metric::L2, &candidates, 3, 4).unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].node, 5);
        assert!(results[0].distance < 1e-6);
        // 4 and 6 tie at distance 1; ascending node index breaks the tie.
        assert_eq!(results[1].node, 4);
        assert_eq!(results[2].node, 6);
    }

    #[test]
    fn test_restricted_candidates() {
        let data = line_source(20);
        let mut source = SliceSource::new(&data, 2);

        let results =
            brute_force_top_k(&mut source, &[5.0, 0.0], Metric::L2, &[0, 10, 19], 2, 64).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node, 0);
        assert_eq!(results[1].node, 10);
    }

    #[test]
    fn test_k_larger_than_candidates() {
        let data = line_source(3);
        let mut source = SliceSource::new(&data, 2);

        let results =
            brute_force_top_k(&mut source, &[0.0, 0.0], Metric::L2, &[0, 1, 2], 10, 64).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_k_zero_short_circuits() {
        let data = line_source(3);
        let mut source = SliceSource::new(&data, 2);
        let results =
            brute_force_top_k(&mut source, &[0.0, 0.0], Metric::L2, &[0, 1, 2], 0, 64).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let data = line_source(3);
        let mut source = SliceSource::new(&data, 2);
        let err = brute_force_top_k(&mut source, &[0.0], Metric::L2, &[0], 1, 64);
        assert!(err.is_err());
    }
}
