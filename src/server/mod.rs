//! Server-side optimizers turning an aggregated delta into the next state.
//!
//! Every optimizer is a pure function `(old_state, aggregated_update) ->
//! new_state`; any state it needs across rounds lives in
//! [`ServerOptimizerState`](crate::state::ServerOptimizerState) inside the [`ModelState`] itself.
//!
//! | Optimizer | Rule |
//! |-----------|------|
//! | [`ServerSgd`] | `x + lr·Δ` (plain FedAvg) |
//! | [`ServerMomentum`] | FedAvgM, `v = βv + Δ`, `x + lr·v` |
//! | [`ServerAdam`] | FedAdam with adaptive per-coordinate step |

pub mod adam;
pub mod momentum;

pub use adam::ServerAdam;
pub use momentum::ServerMomentum;

use serde::{Deserialize, Serialize};

use crate::aggregators::AggregatedUpdate;
use crate::error::Result;
use crate::state::ModelState;

/// Applies an aggregated update to the global model.
pub trait ServerOptimizer: Send + Sync {
    /// Produce the next state. `state` is never modified.
    fn update(&self, state: &ModelState, update: &AggregatedUpdate) -> Result<ModelState>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Single gradient-descent step along the aggregated delta.
#[derive(Clone, Debug)]
pub struct ServerSgd {
    /// Server learning rate.
    pub learning_rate: f32,
}

impl ServerSgd {
    /// Create a plain FedAvg server optimizer.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl ServerOptimizer for ServerSgd {
    fn update(&self, state: &ModelState, update: &AggregatedUpdate) -> Result<ModelState> {
        state.apply(&update.weighted_delta, self.learning_rate)
    }

    fn name(&self) -> &'static str {
        "sgd"
    }
}

/// Serializable choice of server optimizer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerOptimizerConfig {
    /// [`ServerSgd`].
    #[default]
    Sgd,
    /// [`ServerMomentum`].
    Momentum {
        /// Momentum coefficient in `[0, 1)`.
        momentum: f32,
    },
    /// [`ServerAdam`].
    Adam {
        /// First moment decay.
        beta1: f32,
        /// Second moment decay.
        beta2: f32,
        /// Adaptivity (epsilon) term.
        tau: f32,
    },
}

impl ServerOptimizerConfig {
    /// Instantiate the optimizer with `learning_rate`.
    pub fn build(&self, learning_rate: f32) -> Box<dyn ServerOptimizer> {
        match *self {
            Self::Sgd => Box::new(ServerSgd::new(learning_rate)),
            Self::Momentum { momentum } => Box::new(ServerMomentum::new(learning_rate, momentum)),
            Self::Adam { beta1, beta2, tau } => {
                Box::new(ServerAdam::new(learning_rate, beta1, beta2, tau))
            }
        }
    }

    /// Check coefficient ranges.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        match *self {
            Self::Sgd => Ok(()),
            Self::Momentum { momentum } if (0.0..1.0).contains(&momentum) => Ok(()),
            Self::Momentum { momentum } => Err(format!("momentum {} not in [0, 1)", momentum)),
            Self::Adam { beta1, beta2, tau } => {
                if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
                    Err(format!("adam betas ({}, {}) not in [0, 1)", beta1, beta2))
                } else if tau.is_nan() || tau <= 0.0 {
                    Err(format!("adam tau must be positive, got {}", tau))
                } else {
                    Ok(())
                }
            }
        }
    }
}
