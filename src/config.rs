//! Training configuration.
//!
//! [`TrainingConfig`] is the whole configuration surface of a run. It
//! deserializes from JSON with every field optional (missing fields take
//! the defaults below) and is validated once, before any round runs.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FedError, Result};
use crate::privacy::{PrivacyConfig, PrivacyMechanism};
use crate::server::{ServerOptimizer, ServerOptimizerConfig};

/// Which local training path clients use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    /// Plain local SGD.
    #[default]
    None,
    /// DP-SGD with per-microbatch clipping and Gaussian noise.
    LocalDpGaussian,
}

/// Hyperparameters for a federated training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of registered clients.
    pub num_clients: usize,
    /// Local passes over each client's data per round.
    pub local_epochs: usize,
    /// Local batch size.
    pub batch_size: usize,
    /// Learning rate of the client-side optimizer.
    pub client_learning_rate: f32,
    /// Learning rate of the server-side optimizer.
    pub server_learning_rate: f32,
    /// Server optimizer rule.
    pub server_optimizer: ServerOptimizerConfig,
    /// Local privacy mechanism.
    pub privacy_mode: PrivacyMode,
    /// DP clip norm `C` (used when `privacy_mode` is `local_dp_gaussian`).
    pub clip_norm: f32,
    /// DP noise multiplier `σ`.
    pub noise_multiplier: f32,
    /// DP microbatches per local batch.
    pub num_microbatches: usize,
    /// Rounds executed by [`run_rounds`](crate::RoundOrchestrator::run_rounds)
    /// when no explicit count is given.
    pub num_rounds: usize,
    /// Upper bound on clients trained concurrently.
    pub max_parallel_clients: usize,
    /// Base seed for per-client random number generators.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let privacy = PrivacyConfig::default();
        Self {
            num_clients: 10,
            local_epochs: 5,
            batch_size: 20,
            client_learning_rate: 0.02,
            server_learning_rate: 1.0,
            server_optimizer: ServerOptimizerConfig::default(),
            privacy_mode: PrivacyMode::None,
            clip_norm: privacy.clip_norm,
            noise_multiplier: privacy.noise_multiplier,
            num_microbatches: privacy.num_microbatches,
            num_rounds: 10,
            max_parallel_clients: 4,
            seed: 0,
        }
    }
}

fn positive_rate(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FedError::Configuration(format!(
            "{} must be positive, got {}",
            name, value
        )))
    }
}

fn at_least_one(name: &str, value: usize) -> Result<()> {
    if value >= 1 {
        Ok(())
    } else {
        Err(FedError::Configuration(format!("{} must be at least 1", name)))
    }
}

impl TrainingConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FedError::Configuration(e.to_string()))
    }

    /// Read a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            FedError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Reject invalid hyperparameters.
    ///
    /// DP parameters are only checked when DP is selected; they then fail
    /// with [`FedError::PrivacyConfig`].
    pub fn validate(&self) -> Result<()> {
        at_least_one("num_clients", self.num_clients)?;
        at_least_one("local_epochs", self.local_epochs)?;
        at_least_one("batch_size", self.batch_size)?;
        at_least_one("num_rounds", self.num_rounds)?;
        at_least_one("max_parallel_clients", self.max_parallel_clients)?;
        positive_rate("client_learning_rate", self.client_learning_rate)?;
        positive_rate("server_learning_rate", self.server_learning_rate)?;
        self.server_optimizer
            .validate()
            .map_err(FedError::Configuration)?;
        if self.privacy_mode == PrivacyMode::LocalDpGaussian {
            self.privacy_config().validate()?;
        }
        Ok(())
    }

    /// The DP parameters as a [`PrivacyConfig`].
    pub fn privacy_config(&self) -> PrivacyConfig {
        PrivacyConfig {
            clip_norm: self.clip_norm,
            noise_multiplier: self.noise_multiplier,
            num_microbatches: self.num_microbatches,
        }
    }

    /// Build the mechanism selected by `privacy_mode`.
    pub fn privacy_mechanism(&self) -> Result<PrivacyMechanism> {
        match self.privacy_mode {
            PrivacyMode::None => Ok(PrivacyMechanism::NoPrivacy),
            PrivacyMode::LocalDpGaussian => {
                PrivacyMechanism::local_dp_gaussian(self.privacy_config())
            }
        }
    }

    /// Build the configured server optimizer.
    pub fn build_server_optimizer(&self) -> Box<dyn ServerOptimizer> {
        self.server_optimizer.build(self.server_learning_rate)
    }
}
