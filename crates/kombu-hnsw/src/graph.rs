//! In-memory graph produced by construction.

use kombu_vector::NodeId;

/// A built HNSW graph, before or after persistence.
///
/// `links[n][l]` is node `n`'s adjacency at layer `l`, for
/// `l <= levels[n]`; every list is sorted ascending by distance from `n`,
/// deduplicated, and free of self-loops. Layer 0 contains every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HnswGraph {
    /// Max out-degree per layer (`2 * m` at layer 0).
    pub m: u32,
    /// Node anchoring search, resident at the top layer.
    pub entry_point: NodeId,
    /// Highest layer of each node.
    pub levels: Vec<u8>,
    /// Per-node, per-layer adjacency.
    pub links: Vec<Vec<Vec<NodeId>>>,
}

impl HnswGraph {
    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Number of layers (top layer index + 1).
    pub fn num_layers(&self) -> usize {
        self.levels.iter().copied().max().map_or(0, |l| l as usize + 1)
    }

    /// Adjacency of `node` at `layer`, empty if the node is below the layer.
    pub fn neighbors(&self, node: NodeId, layer: usize) -> &[NodeId] {
        self.links
            .get(node as usize)
            .and_then(|per_layer| per_layer.get(layer))
            .map_or(&[], Vec::as_slice)
    }

    /// Total directed edge count across all layers.
    pub fn edge_count(&self) -> usize {
        self.links
            .iter()
            .map(|per_layer| per_layer.iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Degree bound at a layer.
    pub fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m as usize * 2
        } else {
            self.m as usize
        }
    }

    /// Check the structural invariants every persisted graph must satisfy:
    /// in-range neighbors, no self-loops, no duplicates, degree bounds, and
    /// adjacency only at layers the node reaches.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let n = self.len();
        if self.links.len() != n {
            return Err(format!("links holds {} nodes, levels {}", self.links.len(), n));
        }
        if n == 0 {
            return Ok(());
        }
        if self.entry_point as usize >= n {
            return Err(format!("entry point {} out of range", self.entry_point));
        }
        let top = self.num_layers() - 1;
        if usize::from(self.levels[self.entry_point as usize]) != top {
            return Err("entry point is not at the top layer".into());
        }

        for (node, per_layer) in self.links.iter().enumerate() {
            let level = self.levels[node] as usize;
            if per_layer.len() != level + 1 {
                return Err(format!(
                    "node {} at level {} has {} adjacency lists",
                    node,
                    level,
                    per_layer.len()
                ));
            }
            for (layer, list) in per_layer.iter().enumerate() {
                if list.len() > self.max_degree(layer) {
                    return Err(format!(
                        "node {} layer {} degree {} exceeds bound {}",
                        node,
                        layer,
                        list.len(),
                        self.max_degree(layer)
                    ));
                }
                let mut seen = std::collections::HashSet::new();
                for &nb in list {
                    if nb as usize >= n {
                        return Err(format!("node {} layer {} edge to {} out of range", node, layer, nb));
                    }
                    if nb as usize == node {
                        return Err(format!("node {} layer {} self-loop", node, layer));
                    }
                    if usize::from(self.levels[nb as usize]) < layer {
                        return Err(format!(
                            "node {} layer {} edge to {} which is below the layer",
                            node, layer, nb
                        ));
                    }
                    if !seen.insert(nb) {
                        return Err(format!("node {} layer {} duplicate edge to {}", node, layer, nb));
                    }
                }
            }
        }
        Ok(())
    }
}
