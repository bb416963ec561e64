//! Numeric primitives over behavioral feature vectors.
//!
//! Every vector that reaches an index or the repository is L2-normalized
//! first, so cosine similarity on the hot path reduces to a plain dot
//! product.

use serde::{Deserialize, Serialize};

/// Summary statistics used to judge whether an extracted vector carries
/// signal at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStats {
    pub length: usize,
    pub non_zero_count: usize,
    pub zero_count: usize,
    pub non_zero_pct: f32,
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
    /// At least 10% of the components are non-zero.
    pub is_meaningful: bool,
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2-normalize; the zero vector is returned unchanged (it encodes "absent").
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Plain dot product. Callers guarantee equal lengths; mismatched inputs
/// contribute nothing beyond the shorter prefix.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity, clamped to `[-1, 1]`. Degenerate inputs (length
/// mismatch, empty, zero norm) score 0.0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

pub fn stats(v: &[f32]) -> VectorStats {
    if v.is_empty() {
        return VectorStats {
            length: 0,
            non_zero_count: 0,
            zero_count: 0,
            non_zero_pct: 0.0,
            mean: 0.0,
            std: 0.0,
            min: 0.0,
            max: 0.0,
            is_meaningful: false,
        };
    }

    let non_zero_count = v.iter().filter(|x| **x != 0.0).count();
    let mean = v.iter().sum::<f32>() / v.len() as f32;
    let variance = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32;
    let min = v.iter().copied().fold(f32::INFINITY, f32::min);
    let max = v.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    VectorStats {
        length: v.len(),
        non_zero_count,
        zero_count: v.len() - non_zero_count,
        non_zero_pct: non_zero_count as f32 / v.len() as f32 * 100.0,
        mean,
        std: variance.sqrt(),
        min,
        max,
        is_meaningful: non_zero_count as f32 > v.len() as f32 * 0.1,
    }
}
