//! Versioned global model state.
//!
//! A [`ModelState`] is never mutated: every completed round produces a new
//! value with `round + 1`. Parameters sit behind an [`Arc`] so broadcasting
//! a [`ModelSnapshot`] to every client costs one reference count.

pub mod checkpoint;

pub use checkpoint::{checkpoint, restore, Checkpoint};

use std::sync::Arc;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::{FedError, Result};
use crate::math::{all_finite, same_shapes, Tensors};
use crate::model::ModelTemplate;

/// Per-optimizer state carried between rounds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ServerOptimizerState {
    /// No state (plain SGD, or a freshly restored run).
    #[default]
    Stateless,
    /// Momentum buffer for FedAvgM.
    Momentum {
        /// Velocity, shaped like the parameters.
        velocity: Tensors,
    },
    /// First and second moment estimates for FedAdam.
    Adam {
        /// First moment.
        m: Tensors,
        /// Second moment.
        v: Tensors,
        /// Number of Adam steps taken.
        step: u64,
    },
}

/// Immutable snapshot of the global model for one round.
#[derive(Clone, Debug)]
pub struct ModelState {
    parameters: Arc<Tensors>,
    round: u64,
    server_optimizer_state: ServerOptimizerState,
}

/// Read-only view of a [`ModelState`] handed to clients and the evaluator.
#[derive(Clone, Debug)]
pub struct ModelSnapshot {
    parameters: Arc<Tensors>,
    round: u64,
}

impl ModelSnapshot {
    /// Global parameters.
    pub fn parameters(&self) -> &[ArrayD<f32>] {
        &self.parameters
    }

    /// Round the snapshot was taken at.
    pub fn round(&self) -> u64 {
        self.round
    }
}

fn validate_parameters(parameters: &[ArrayD<f32>]) -> Result<()> {
    if parameters.is_empty() {
        return Err(FedError::Configuration(
            "model template has no parameter tensors".into(),
        ));
    }
    if let Some(i) = parameters.iter().position(|t| t.is_empty()) {
        return Err(FedError::Configuration(format!(
            "parameter tensor {} has no elements",
            i
        )));
    }
    if !all_finite(parameters) {
        return Err(FedError::Configuration(
            "model template contains non-finite values".into(),
        ));
    }
    Ok(())
}

impl ModelState {
    /// Round-0 state from a model template.
    pub fn initialize(template: &ModelTemplate) -> Result<Self> {
        Self::at_round(template.parameters.clone(), 0)
    }

    /// State at an arbitrary round with fresh optimizer state (used by restore).
    pub(crate) fn at_round(parameters: Tensors, round: u64) -> Result<Self> {
        validate_parameters(&parameters)?;
        Ok(Self {
            parameters: Arc::new(parameters),
            round,
            server_optimizer_state: ServerOptimizerState::Stateless,
        })
    }

    /// The next state: `round + 1` with new parameters and optimizer state.
    ///
    /// Fails with [`FedError::DimensionMismatch`] if the shapes change and
    /// [`FedError::Numerical`] if any parameter is non-finite. On failure
    /// `self` is untouched.
    pub fn advance(
        &self,
        parameters: Tensors,
        server_optimizer_state: ServerOptimizerState,
    ) -> Result<Self> {
        if !same_shapes(&parameters, &self.parameters) {
            return Err(FedError::DimensionMismatch(
                "new parameters do not match the current model shape".into(),
            ));
        }
        if !all_finite(&parameters) {
            return Err(FedError::Numerical(format!(
                "server update for round {} produced non-finite parameters",
                self.round + 1
            )));
        }
        Ok(Self {
            parameters: Arc::new(parameters),
            round: self.round + 1,
            server_optimizer_state,
        })
    }

    /// FedAvg server step: `new = old + server_lr * delta`.
    pub fn apply(&self, delta: &[ArrayD<f32>], server_lr: f32) -> Result<Self> {
        if !same_shapes(delta, &self.parameters) {
            return Err(FedError::DimensionMismatch(
                "delta does not match the model shape".into(),
            ));
        }
        let parameters = self
            .parameters
            .iter()
            .zip(delta)
            .map(|(p, d)| {
                let mut next = p.clone();
                next.scaled_add(server_lr, d);
                next
            })
            .collect();
        self.advance(parameters, self.server_optimizer_state.clone())
    }

    /// Read-only view for broadcast and evaluation.
    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            parameters: Arc::clone(&self.parameters),
            round: self.round,
        }
    }

    /// Completed rounds.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Global parameters.
    pub fn parameters(&self) -> &[ArrayD<f32>] {
        &self.parameters
    }

    /// State carried by the server optimizer.
    pub fn server_optimizer_state(&self) -> &ServerOptimizerState {
        &self.server_optimizer_state
    }
}
