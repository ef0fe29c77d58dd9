//! Privacy mechanisms applied inside client-local training.
//!
//! Every local gradient step is routed through [`PrivacyMechanism::process_step`]
//! once per microbatch, so the training loop is written once and does not
//! care which variant is active:
//!
//! | Variant | Effect |
//! |---------|--------|
//! | [`PrivacyMechanism::NoPrivacy`] | identity |
//! | [`PrivacyMechanism::LocalDpGaussian`] | clip to `C`, add `N(0, (σC)²)` per coordinate |
//!
//! No privacy accountant is attached; the `(C, σ, m)` triple alone does not
//! establish an epsilon guarantee.

pub mod gaussian;

pub use gaussian::{clip_by_global_norm, LocalDpGaussian};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FedError, Result};
use crate::math::Tensors;

/// Immutable DP-SGD parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Maximum L2 norm of a microbatch gradient (`C`).
    pub clip_norm: f32,
    /// Noise standard deviation relative to `clip_norm` (`σ`).
    pub noise_multiplier: f32,
    /// Microbatches each local batch is split into (`m`).
    pub num_microbatches: usize,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            clip_norm: 1.0,
            noise_multiplier: 0.5,
            num_microbatches: 1,
        }
    }
}

impl PrivacyConfig {
    /// Check `C > 0`, `σ >= 0` and `m >= 1`.
    pub fn validate(&self) -> Result<()> {
        if !(self.clip_norm.is_finite() && self.clip_norm > 0.0) {
            return Err(FedError::PrivacyConfig(format!(
                "clip_norm must be positive, got {}",
                self.clip_norm
            )));
        }
        if !(self.noise_multiplier.is_finite() && self.noise_multiplier >= 0.0) {
            return Err(FedError::PrivacyConfig(format!(
                "noise_multiplier must be non-negative, got {}",
                self.noise_multiplier
            )));
        }
        if self.num_microbatches == 0 {
            return Err(FedError::PrivacyConfig(
                "num_microbatches must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Per-coordinate noise standard deviation `σ·C`.
    pub fn noise_stddev(&self) -> f32 {
        self.noise_multiplier * self.clip_norm
    }
}

/// Strategy applied to each local gradient before the optimizer consumes it.
#[derive(Clone, Debug, Default)]
pub enum PrivacyMechanism {
    /// Gradients pass through unchanged.
    #[default]
    NoPrivacy,
    /// Per-microbatch clipping and Gaussian noise (DP-SGD).
    LocalDpGaussian(LocalDpGaussian),
}

impl PrivacyMechanism {
    /// Build the Gaussian mechanism, validating `config`.
    pub fn local_dp_gaussian(config: PrivacyConfig) -> Result<Self> {
        Ok(Self::LocalDpGaussian(LocalDpGaussian::new(config)?))
    }

    /// Whether clipping and noise are applied.
    pub fn is_private(&self) -> bool {
        matches!(self, Self::LocalDpGaussian(_))
    }

    /// The DP configuration, if any.
    pub fn config(&self) -> Option<&PrivacyConfig> {
        match self {
            Self::NoPrivacy => None,
            Self::LocalDpGaussian(m) => Some(m.config()),
        }
    }

    /// How many microbatches a local batch is split into.
    pub fn num_microbatches(&self) -> usize {
        self.config().map_or(1, |c| c.num_microbatches)
    }

    /// Process one microbatch gradient.
    pub fn process_step<R: Rng + ?Sized>(&self, raw_gradient: Tensors, rng: &mut R) -> Result<Tensors> {
        match self {
            Self::NoPrivacy => Ok(raw_gradient),
            Self::LocalDpGaussian(m) => m.process_step(raw_gradient, rng),
        }
    }

    /// Process every microbatch gradient of one batch and average the results.
    ///
    /// A single microbatch is returned as processed, with no extra arithmetic.
    pub fn process_microbatches<R: Rng + ?Sized>(
        &self,
        microbatch_gradients: Vec<Tensors>,
        rng: &mut R,
    ) -> Result<Tensors> {
        let count = microbatch_gradients.len();
        let mut iter = microbatch_gradients.into_iter();
        let first = match iter.next() {
            Some(g) => self.process_step(g, rng)?,
            None => {
                return Err(FedError::Configuration(
                    "no microbatch gradients to process".into(),
                ))
            }
        };
        if count == 1 {
            return Ok(first);
        }

        let mut sum = first;
        for raw in iter {
            let processed = self.process_step(raw, rng)?;
            for (acc, g) in sum.iter_mut().zip(&processed) {
                *acc += g;
            }
        }
        let inv = 1.0 / count as f32;
        for acc in sum.iter_mut() {
            acc.mapv_inplace(|x| x * inv);
        }
        Ok(sum)
    }
}
