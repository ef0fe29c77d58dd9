//! Local DP-SGD step: per-microbatch L2 clipping plus Gaussian noise.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::PrivacyConfig;
use crate::error::{FedError, Result};
use crate::math::{global_l2_norm, Tensors};

/// Shrink applied on top of `C / norm` so f32 rounding cannot push the
/// clipped norm back above `C`.
const CLIP_SLACK: f64 = 1.0 - 1e-6;

/// Scale `gradient` so its global L2 norm is at most `clip_norm`.
///
/// Gradients already inside the ball are returned untouched. Returns the
/// (possibly) clipped gradient and the norm measured before clipping.
pub fn clip_by_global_norm(gradient: Tensors, clip_norm: f32) -> Result<(Tensors, f64)> {
    let norm = global_l2_norm(&gradient);
    if !norm.is_finite() {
        return Err(FedError::Numerical(format!(
            "gradient norm is not finite ({})",
            norm
        )));
    }
    if norm <= clip_norm as f64 {
        return Ok((gradient, norm));
    }

    let scale = clip_norm as f64 / norm * CLIP_SLACK;
    let clipped = gradient
        .into_iter()
        .map(|t| t.mapv(|x| (x as f64 * scale) as f32))
        .collect();
    Ok((clipped, norm))
}

/// Gaussian mechanism applied to every local optimization microbatch.
#[derive(Clone, Debug)]
pub struct LocalDpGaussian {
    config: PrivacyConfig,
}

impl LocalDpGaussian {
    /// Create the mechanism, rejecting `clip_norm <= 0` or `noise_multiplier < 0`.
    pub fn new(config: PrivacyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The immutable configuration.
    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    /// Clip, then add `N(0, (σ·C)²)` noise to every coordinate.
    pub fn process_step<R: Rng + ?Sized>(&self, raw_gradient: Tensors, rng: &mut R) -> Result<Tensors> {
        self.config.validate()?;
        let (mut gradient, _) = clip_by_global_norm(raw_gradient, self.config.clip_norm)?;

        let stddev = self.config.noise_stddev();
        if stddev > 0.0 {
            let normal =
                Normal::new(0.0f32, stddev).map_err(|e| FedError::PrivacyConfig(e.to_string()))?;
            for tensor in gradient.iter_mut() {
                tensor.mapv_inplace(|x| x + normal.sample(rng));
            }
        }
        Ok(gradient)
    }
}
