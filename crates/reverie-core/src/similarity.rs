//! Similarity and distance math over vector views.
//!
//! All functions assume the caller has already checked that both slices share
//! the store's dimensionality. Sums accumulate in f64 to keep rounding under
//! control at large dimensions, then narrow to f32.

use crate::types::DistanceMetric;

/// Dot product of two vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum::<f64>() as f32
}

/// Euclidean norm of a vector.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt() as f32
}

/// Cosine similarity given precomputed magnitudes.
///
/// Yields 0 when either magnitude is 0 (a zero vector points nowhere).
pub fn cosine(a: &[f32], b: &[f32], mag_a: f32, mag_b: f32) -> f32 {
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (mag_a * mag_b)
}

/// Euclidean distance between two vectors.
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

/// Distance under `metric`, lower-is-closer.
///
/// This is the ordering space the index works in: `1 - cosine` for cosine,
/// the raw distance for euclidean, and negated dot for dot product.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32], mag_a: f32, mag_b: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - cosine(a, b, mag_a, mag_b),
        DistanceMetric::Euclidean => euclidean(a, b),
        DistanceMetric::Dot => -dot(a, b),
    }
}

/// Map an index-space distance back into the single higher-is-better
/// similarity space results are reported in.
pub fn similarity_from_distance(metric: DistanceMetric, d: f32) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - d,
        DistanceMetric::Euclidean => 1.0 / (1.0 + d),
        DistanceMetric::Dot => -d,
    }
}

/// Similarity under `metric`, computed directly from the vectors.
pub fn similarity(metric: DistanceMetric, a: &[f32], b: &[f32], mag_a: f32, mag_b: f32) -> f32 {
    similarity_from_distance(metric, distance(metric, a, b, mag_a, mag_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot() {
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(dot(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_magnitude() {
        assert!((magnitude(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(magnitude(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_identical() {
        let a = [1.0, 2.0, 3.0];
        let m = magnitude(&a);
        assert!((cosine(&a, &a, m, m) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!(cosine(&a, &b, 1.0, 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_magnitude() {
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        assert_eq!(cosine(&a, &b, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_euclidean() {
        assert!((euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(euclidean(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_distance_similarity_roundtrip() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.7071, 0.7071, 0.0];
        let ma = magnitude(&a);
        let mb = magnitude(&b);

        for metric in [
            DistanceMetric::Cosine,
            DistanceMetric::Euclidean,
            DistanceMetric::Dot,
        ] {
            let d = distance(metric, &a, &b, ma, mb);
            let s = similarity_from_distance(metric, d);
            assert_eq!(s, similarity(metric, &a, &b, ma, mb));
        }
    }

    #[test]
    fn test_euclidean_similarity_mapping() {
        // d = 0 → similarity 1; larger d → smaller similarity
        assert_eq!(similarity_from_distance(DistanceMetric::Euclidean, 0.0), 1.0);
        assert!(
            similarity_from_distance(DistanceMetric::Euclidean, 1.0)
                > similarity_from_distance(DistanceMetric::Euclidean, 2.0)
        );
    }

    #[test]
    fn test_f64_accumulation_large_dimension() {
        // 1536 identical small components; f32 accumulation would drift.
        let v = vec![0.001f32; 1536];
        let expected = (1536.0f64 * (0.001f64 * 0.001f64)).sqrt();
        assert!((magnitude(&v) as f64 - expected).abs() < 1e-9);
    }
}
