//! Mathematical primitives for federated training.
//!
//! Provides shared math utilities used by clipping, aggregation and the
//! server optimizers:
//!
//! - [`norms`]: global L2 norm, finiteness and shape checks

pub mod norms;

pub use norms::{all_finite, global_l2_norm, same_shapes};

use ndarray::ArrayD;

/// An ordered sequence of model tensors (parameters, deltas or gradients).
pub type Tensors = Vec<ArrayD<f32>>;

/// Zero tensors shaped like `like`.
pub fn zeros_like(like: &[ArrayD<f32>]) -> Tensors {
    like.iter().map(|t| ArrayD::zeros(t.raw_dim())).collect()
}
