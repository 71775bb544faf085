//! Distance metrics.
//!
//! Two metrics, matching what the index manifest records:
//! - **Cosine**: 1 - cos(a, b). For unit-norm embeddings this reduces to
//!   1 - dot(a, b).
//! - **L2**: squared Euclidean distance. Ordering-equivalent to true L2 and
//!   avoids the sqrt in the beam loop.
//!
//! The hot paths are single-pass folds over zipped slices; release builds
//! vectorize them well enough that nothing fancier is warranted here.

use serde::{Deserialize, Serialize};

/// Distance metric, fixed per index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine distance: 1 - (a · b) / (||a|| * ||b||)
    Cosine,
    /// Squared Euclidean distance: sum((a[i] - b[i])^2)
    L2,
}

impl Metric {
    /// Compute distance between two vectors. Lower = more similar.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::L2 => squared_l2_distance(a, b),
        }
    }

    /// Similarity derived from a distance, used for hybrid scoring.
    ///
    /// Cosine: `1 - d` (the cosine itself). L2: `-d`, so that larger is
    /// always more similar under either metric.
    #[inline]
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            Self::Cosine => 1.0 - distance,
            Self::L2 => -distance,
        }
    }

    /// Manifest string for this metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
        }
    }
}

/// Compute squared Euclidean distance between two vectors.
#[inline]
pub fn squared_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter()
        .zip(b)
        .fold(0.0f32, |acc, (&x, &y)| {
            let diff = x - y;
            acc + diff * diff
        })
}

/// Compute cosine distance between two vectors.
///
/// Returns a value in [0, 2]: 0 = same direction, 1 = orthogonal,
/// 2 = opposite. Zero vectors have no direction and are treated as
/// orthogonal to everything.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    // Dot product and both squared norms in one pass.
    let (dot, a_sq, b_sq) = a.iter().zip(b).fold(
        (0.0f32, 0.0f32, 0.0f32),
        |(dot, a_sq, b_sq), (&x, &y)| (dot + x * y, a_sq + x * x, b_sq + y * y),
    );

    let denom = (a_sq * b_sq).sqrt();
    if denom < f32::EPSILON {
        return 1.0;
    }

    1.0 - (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squared_l2() {
        // Diffs 2, -3, -2: squared sum 17.
        assert!((squared_l2_distance(&[1.0, -2.0, 2.0], &[-1.0, 1.0, 4.0]) - 17.0).abs() < 1e-6);
        assert!(squared_l2_distance(&[0.5, 0.25], &[0.5, 0.25]) < 1e-6);
    }

    #[test]
    fn test_l2_matches_manual_accumulation() {
        let a: Vec<f32> = (0..37).map(|i| (i as f32 * 0.25).sin()).collect();
        let b: Vec<f32> = (0..37).map(|i| (i as f32 * 0.5).cos()).collect();

        let mut want = 0.0f32;
        for (x, y) in a.iter().zip(&b) {
            want += (x - y) * (x - y);
        }
        assert!((squared_l2_distance(&a, &b) - want).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_spans_zero_to_two() {
        // Same direction, orthogonal, opposite.
        assert!(cosine_distance(&[2.0, 0.0], &[5.0, 0.0]) < 1e-6);
        assert!((cosine_distance(&[3.0, 0.0], &[0.0, 0.2]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[0.0, 1.5], &[0.0, -4.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_is_scale_invariant() {
        let a = [0.3, -0.7, 0.9];
        let b = [1.1, 0.4, -0.2];
        let scaled: Vec<f32> = b.iter().map(|v| v * 42.0).collect();
        assert!((cosine_distance(&a, &b) - cosine_distance(&a, &scaled)).abs() < 1e-5);
    }

    #[test]
    fn test_degenerate_cosine_is_orthogonal() {
        assert!((cosine_distance(&[0.0; 4], &[0.2, 0.4, 0.1, 0.8]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_vector_cosine_is_one_minus_dot() {
        let a = [0.6, 0.8, 0.0];
        let b = [0.0, 1.0, 0.0];
        assert!((Metric::Cosine.distance(&a, &b) - (1.0 - 0.8)).abs() < 1e-6);
    }

    #[test]
    fn test_metric_dispatch() {
        let a = [0.0, 3.0];
        let b = [4.0, 0.0];
        assert!((Metric::L2.distance(&a, &b) - 25.0).abs() < 1e-6);
        assert!((Metric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orientation() {
        // Larger similarity must mean smaller distance for both metrics.
        assert!(Metric::Cosine.similarity(0.1) > Metric::Cosine.similarity(0.9));
        assert!(Metric::L2.similarity(1.0) > Metric::L2.similarity(5.0));
    }

    #[test]
    fn test_similarity_recovers_the_cosine() {
        let d = cosine_distance(&[0.6, 0.8], &[1.0, 0.0]);
        assert!((Metric::Cosine.similarity(d) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_metric_serde_names() {
        assert_eq!(serde_json::to_string(&Metric::Cosine).unwrap(), "\"cosine\"");
        assert_eq!(serde_json::to_string(&Metric::L2).unwrap(), "\"l2\"");
    }
}
