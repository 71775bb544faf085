//! Corpus generators.

use kombu_engine::Document;

/// `n` documents of deterministic pseudo-random word salad, ids `doc-0000`
/// onward.
pub fn random_corpus(n: usize) -> Vec<Document> {
    const WORDS: [&str; 16] = [
        "kelp", "tide", "reef", "brine", "drift", "swell", "foam", "gull", "anchor", "harbor",
        "current", "depth", "shoal", "wrack", "siphon", "plankton",
    ];

    let mut state = 0x5DEE_CE66_D123_4567u64;
    let mut next = move |bound: usize| -> usize {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as usize % bound
    };

    (0..n)
        .map(|i| {
            let len = 4 + next(12);
            let text: Vec<&str> = (0..len).map(|_| WORDS[next(WORDS.len())]).collect();
            Document::new(text.join(" ")).with_id(format!("doc-{:04}", i))
        })
        .collect()
}

/// A random corpus where the first `tagged` documents carry
/// `metadata.tag = value`.
pub fn tagged_corpus(n: usize, tagged: usize, value: &str) -> Vec<Document> {
    random_corpus(n)
        .into_iter()
        .enumerate()
        .map(|(i, doc)| {
            if i < tagged {
                let mut metadata = serde_json::Map::new();
                metadata.insert("tag".into(), serde_json::Value::String(value.into()));
                doc.with_metadata(metadata)
            } else {
                doc
            }
        })
        .collect()
}
