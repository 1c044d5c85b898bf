//! Vector math shared by the clusterers and the user embedding aggregator.
//!
//! Accumulation happens in `f64` and results are narrowed back to `f32`, the
//! storage type of every embedding in the crate.

use crate::error::VectorError;

/// Default dimensionality of article and user embeddings.
pub const DEFAULT_DIMENSION: usize = 768;

/// Returns true for vectors that mark an unavailable embedding.
///
/// Empty and all-zero vectors are both treated as "no embedding".
pub fn is_sentinel(v: &[f32]) -> bool {
    v.iter().all(|x| *x == 0.0)
}

/// An all-zero placeholder of the given dimension.
pub fn sentinel(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}

/// Euclidean norm.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt()
}

/// Cosine similarity in `[-1, 1]`.
///
/// A zero-norm operand yields 0.0. Mismatched lengths are an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    check_dimension(a.len(), b.len())?;

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32)
}

/// Scale a vector to unit length. The zero vector is returned unchanged.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| ((*x as f64) / norm) as f32).collect()
}

/// Weighted mean `sum(v_i * w_i) / sum(w_i)`.
///
/// Returns `Ok(None)` when there is nothing to average: an empty list or a
/// non-positive or non-finite weight sum. Callers treat that as "no embedding computable".
pub fn weighted_mean<V: AsRef<[f32]>>(
    vectors: &[V],
    weights: &[f64],
) -> Result<Option<Vec<f32>>, VectorError> {
    if vectors.len() != weights.len() {
        return Err(VectorError::WeightCount {
            vectors: vectors.len(),
            weights: weights.len(),
        });
    }
    let Some(first) = vectors.first() else {
        return Ok(None);
    };

    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Ok(None);
    }

    let dim = first.as_ref().len();
    let mut acc = vec![0.0f64; dim];
    for (v, w) in vectors.iter().zip(weights) {
        let v = v.as_ref();
        check_dimension(dim, v.len())?;
        for (slot, x) in acc.iter_mut().zip(v) {
            *slot += (*x as f64) * w;
        }
    }

    Ok(Some(acc.into_iter().map(|x| (x / total) as f32).collect()))
}

/// Unweighted mean, `None` for an empty list.
pub fn mean<V: AsRef<[f32]>>(vectors: &[V]) -> Result<Option<Vec<f32>>, VectorError> {
    weighted_mean(vectors, &vec![1.0; vectors.len()])
}

/// Fail unless `got == expected`.
pub fn check_dimension(expected: usize, got: usize) -> Result<(), VectorError> {
    if expected != got {
        return Err(VectorError::DimensionMismatch { expected, got });
    }
    Ok(())
}
