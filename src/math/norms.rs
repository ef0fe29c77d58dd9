//! Norm and sanity checks over tensor sequences.
//!
//! Used by gradient clipping and numerical checks on aggregated updates.

use ndarray::ArrayD;

/// L2 norm of a whole tensor sequence, treated as one flattened vector.
///
/// Accumulates in f64 so very large gradients do not overflow to infinity
/// before the square root.
pub fn global_l2_norm(tensors: &[ArrayD<f32>]) -> f64 {
    tensors
        .iter()
        .flat_map(|t| t.iter())
        .map(|&x| {
            let x = x as f64;
            x * x
        })
        .sum::<f64>()
        .sqrt()
}

/// Whether every coordinate of every tensor is finite.
pub fn all_finite(tensors: &[ArrayD<f32>]) -> bool {
    tensors.iter().all(|t| t.iter().all(|x| x.is_finite()))
}

/// Whether two tensor sequences have the same length and per-position shapes.
pub fn same_shapes(a: &[ArrayD<f32>], b: &[ArrayD<f32>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.shape() == y.shape())
}
