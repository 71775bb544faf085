use kombu_hnsw::{build_graph, compact, write_graph, HnswFile, HnswParams};
use kombu_vector::{Metric, NodeId, SliceSource};
use proptest::prelude::*;
use tempfile::TempDir;

const DIM: usize = 4;

fn arb_vectors() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, DIM..=40 * DIM)
        .prop_map(|mut v| {
            v.truncate(v.len() / DIM * DIM);
            v
        })
        .prop_filter("at least one vector", |v| v.len() >= DIM)
}

fn params(seed: u64) -> HnswParams {
    HnswParams {
        m: 4,
        ef_construction: 16,
        max_layers: 6,
        seed,
        metric: Metric::L2,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the corpus, a built graph satisfies its structural
    /// invariants and survives a file roundtrip unchanged.
    #[test]
    fn prop_build_persist_roundtrip(data in arb_vectors(), seed in 0u64..1000) {
        let source = SliceSource::new(&data, DIM);
        let graph = build_graph(&source, &params(seed), &mut |_, _| {}).unwrap();
        prop_assert!(graph.check_invariants().is_ok());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.graph");
        write_graph(&graph, &path).unwrap();

        let file = HnswFile::open(&path).unwrap();
        prop_assert!(file.verify().is_ok());
        prop_assert_eq!(file.len(), graph.len());
        prop_assert_eq!(file.entry_point(), graph.entry_point);
        for node in 0..graph.len() as NodeId {
            for layer in 0..=usize::from(graph.levels[node as usize]) {
                prop_assert_eq!(
                    file.neighbors(node, layer).unwrap(),
                    graph.neighbors(node, layer).to_vec()
                );
            }
        }
    }

    /// Compaction permutes, never mutates: edge counts and invariants hold.
    #[test]
    fn prop_compaction_preserves_topology(data in arb_vectors(), seed in 0u64..1000) {
        let source = SliceSource::new(&data, DIM);
        let graph = build_graph(&source, &params(seed), &mut |_, _| {}).unwrap();
        let edges = graph.edge_count();

        let (compacted, old_to_new) = compact(graph);
        prop_assert!(compacted.check_invariants().is_ok());
        prop_assert_eq!(compacted.edge_count(), edges);

        let mut sorted = old_to_new;
        sorted.sort_unstable();
        let identity: Vec<NodeId> = (0..compacted.len() as NodeId).collect();
        prop_assert_eq!(sorted, identity);
    }
}
