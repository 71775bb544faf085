//! Vamana graph construction.
//!
//! Random initial R-graph, then `num_passes` sweeps where every node is
//! re-linked via greedy search from the medoid plus robust pruning. The
//! first pass runs with `alpha = 1.0`, later passes with the configured
//! slack, as in the DiskANN construction schedule.

use crate::{Result, VamanaError, VamanaParams};
use kombu_vector::{Metric, Neighbor, NodeId, SliceSource};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// A built Vamana graph.
///
/// `links[n]` is node `n`'s adjacency, at most `r` entries, sorted ascending
/// by distance from `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VamanaGraph {
    pub r: u32,
    /// Medoid of the corpus; every search starts here.
    pub entry_point: NodeId,
    pub links: Vec<Vec<NodeId>>,
}

impl VamanaGraph {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Structural invariants: in-range, no self-loops, no duplicates,
    /// degree ≤ R.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let n = self.len();
        if n == 0 {
            return Ok(());
        }
        if self.entry_point as usize >= n {
            return Err(format!("entry point {} out of range", self.entry_point));
        }
        for (node, list) in self.links.iter().enumerate() {
            if list.len() > self.r as usize {
                return Err(format!(
                    "node {} degree {} exceeds R={}",
                    node,
                    list.len(),
                    self.r
                ));
            }
            let mut seen = HashSet::new();
            for &nb in list {
                if nb as usize >= n {
                    return Err(format!("node {} edge to {} out of range", node, nb));
                }
                if nb as usize == node {
                    return Err(format!("node {} self-loop", node));
                }
                if !seen.insert(nb) {
                    return Err(format!("node {} duplicate edge to {}", node, nb));
                }
            }
        }
        Ok(())
    }
}

/// Build a Vamana graph over `vectors` (row `i` = node `i`).
///
/// `on_progress(done, total)` fires once per node per pass.
pub fn build_graph(
    vectors: &SliceSource<'_>,
    params: &VamanaParams,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<VamanaGraph> {
    let n = vectors.len();
    if n == 0 {
        return Err(VamanaError::Build("cannot build over zero vectors".into()));
    }
    if params.r < 2 {
        return Err(VamanaError::Build(format!("R must be at least 2, got {}", params.r)));
    }

    let entry_point = medoid(vectors, params.metric);
    let mut state = BuildState {
        vectors,
        metric: params.metric,
        r: params.r,
        l_build: params.l_build.max(params.r),
        graph: VamanaGraph {
            r: params.r as u32,
            entry_point,
            links: vec![Vec::new(); n],
        },
    };

    state.init_random(params.seed);

    let total = n * params.num_passes.max(1);
    let mut done = 0usize;
    for pass in 0..params.num_passes.max(1) {
        let alpha = if pass == 0 { 1.0 } else { params.alpha };
        for node in 0..n as NodeId {
            state.relink(node, alpha);
            done += 1;
            on_progress(done, total);
        }
    }

    tracing::debug!(nodes = n, entry = entry_point, "vamana graph built");
    Ok(state.graph)
}

/// Node closest to the corpus centroid.
fn medoid(vectors: &SliceSource<'_>, metric: Metric) -> NodeId {
    let n = vectors.len();
    let dim = vectors.dimension();

    let mut centroid = vec![0.0f64; dim];
    for node in 0..n as NodeId {
        for (acc, &v) in centroid.iter_mut().zip(vectors.row(node)) {
            *acc += v as f64;
        }
    }
    let centroid: Vec<f32> = centroid.iter().map(|&v| (v / n as f64) as f32).collect();

    let mut best = Neighbor::new(0, f32::MAX);
    for node in 0..n as NodeId {
        let d = metric.distance(&centroid, vectors.row(node));
        let cand = Neighbor::new(node, d);
        if cand < best {
            best = cand;
        }
    }
    best.node
}

struct BuildState<'a> {
    vectors: &'a SliceSource<'a>,
    metric: Metric,
    r: usize,
    l_build: usize,
    graph: VamanaGraph,
}

impl BuildState<'_> {
    fn distance(&self, a: NodeId, b: NodeId) -> f32 {
        self.metric.distance(self.vectors.row(a), self.vectors.row(b))
    }

    /// Seeded random initial graph, R out-edges per node.
    fn init_random(&mut self, seed: u64) {
        let n = self.graph.len();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut pool: Vec<NodeId> = (0..n as NodeId).collect();

        for node in 0..n as NodeId {
            pool.shuffle(&mut rng);
            let mut list: Vec<NodeId> = pool
                .iter()
                .copied()
                .filter(|&x| x != node)
                .take(self.r.min(n.saturating_sub(1)))
                .collect();
            list.sort_by(|&a, &b| {
                Neighbor::new(a, self.distance(node, a))
                    .cmp(&Neighbor::new(b, self.distance(node, b)))
            });
            self.graph.links[node as usize] = list;
        }
    }

    /// One Vamana refinement step for `node`.
    fn relink(&mut self, node: NodeId, alpha: f32) {
        let visited = self.greedy_search_visited(node);
        let pruned = self.robust_prune(node, visited, alpha);

        self.graph.links[node as usize] = pruned.iter().map(|c| c.node).collect();

        // Reverse edges, pruning the far side when it overflows.
        for &chosen in &pruned {
            if self.graph.links[chosen.node as usize].contains(&node) {
                continue;
            }
            self.graph.links[chosen.node as usize].push(node);

            let mut scored: Vec<Neighbor> = self.graph.links[chosen.node as usize]
                .iter()
                .map(|&nb| Neighbor::new(nb, self.distance(chosen.node, nb)))
                .collect();
            scored.sort();

            let kept = if scored.len() > self.r {
                self.robust_prune(chosen.node, scored, alpha)
            } else {
                scored
            };
            self.graph.links[chosen.node as usize] =
                kept.into_iter().map(|c| c.node).collect();
        }
    }

    /// Greedy search for `node`'s own vector from the medoid; returns every
    /// visited candidate, the pool robust pruning selects from.
    fn greedy_search_visited(&self, node: NodeId) -> Vec<Neighbor> {
        let query = self.vectors.row(node);
        let entry = self.graph.entry_point;

        let mut frontier: BinaryHeap<Reverse<Neighbor>> = BinaryHeap::new();
        let mut results: BinaryHeap<Neighbor> = BinaryHeap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut all_visited: Vec<Neighbor> = Vec::new();

        let start = Neighbor::new(entry, self.metric.distance(query, self.vectors.row(entry)));
        frontier.push(Reverse(start));
        results.push(start);
        visited.insert(entry);
        all_visited.push(start);

        while let Some(Reverse(current)) = frontier.pop() {
            if results.len() >= self.l_build {
                if let Some(worst) = results.peek() {
                    if current.distance > worst.distance {
                        break;
                    }
                }
            }

            for &nb in &self.graph.links[current.node as usize] {
                if !visited.insert(nb) {
                    continue;
                }
                let dist = self.metric.distance(query, self.vectors.row(nb));
                let cand = Neighbor::new(nb, dist);
                all_visited.push(cand);

                let should_add = results.len() < self.l_build
                    || results.peek().map(|w| dist < w.distance).unwrap_or(true);
                if should_add {
                    frontier.push(Reverse(cand));
                    results.push(cand);
                    while results.len() > self.l_build {
                        results.pop();
                    }
                }
            }
        }

        all_visited
    }

    /// Robust prune: greedily keep the closest candidate, then discard
    /// everything it occludes under the `alpha` slack.
    fn robust_prune(&self, node: NodeId, candidates: Vec<Neighbor>, alpha: f32) -> Vec<Neighbor> {
        let mut remaining: Vec<Neighbor> = candidates
            .into_iter()
            .filter(|c| c.node != node)
            .collect();
        remaining.sort();
        remaining.dedup_by_key(|c| c.node);

        let mut kept: Vec<Neighbor> = Vec::with_capacity(self.r);
        while let Some(best) = remaining.first().copied() {
            kept.push(best);
            if kept.len() >= self.r {
                break;
            }
            remaining.retain(|c| {
                c.node != best.node && c.distance < alpha * self.distance(best.node, c.node)
            });
        }
        kept
    }
}
