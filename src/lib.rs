//! # fedavg-dp: Federated Averaging with Local Differential Privacy
//!
//! Trains a shared model across data-holding clients without centralizing
//! their data. Each round the server broadcasts the global parameters,
//! clients train locally (optionally under DP-SGD), and the server averages
//! the returned deltas weighted by local example counts.
//!
//! ## Components
//!
//! - [`ModelState`] - Immutable, versioned global parameters
//! - [`ClientComputation`] - Local training producing a [`ClientUpdate`]
//! - [`PrivacyMechanism`] - `NoPrivacy` or per-microbatch `LocalDpGaussian`
//! - [`Aggregator`] - FedAvg over accepted updates
//! - [`ServerOptimizer`] - SGD, momentum or Adam server step
//! - [`RoundOrchestrator`] - The round state machine and worker pool
//! - [`Evaluator`] - Held-out loss/accuracy of a final model
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fedavg_dp::model::{InMemoryDataset, SoftmaxRegression};
//! use fedavg_dp::{Client, RoundOrchestrator, TrainingConfig};
//! use ndarray::array;
//!
//! let model = Arc::new(SoftmaxRegression::new(2, 2));
//! let clients = vec![
//!     Client::new("a", InMemoryDataset::new(array![[1.0, 0.0], [0.0, 1.0]], vec![0, 1]).unwrap()),
//!     Client::new("b", InMemoryDataset::new(array![[0.9, 0.1]], vec![0]).unwrap()),
//! ];
//! let config = TrainingConfig {
//!     num_clients: 2,
//!     num_rounds: 3,
//!     ..TrainingConfig::default()
//! };
//!
//! let mut orchestrator =
//!     RoundOrchestrator::new(config, model.as_ref(), model.clone(), clients).unwrap();
//! let records = orchestrator.run().unwrap();
//! assert_eq!(records.len(), 3);
//! assert_eq!(orchestrator.state().round(), 3);
//! ```

#![deny(missing_docs)]

pub mod aggregators;
pub mod client;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod math;
pub mod model;
pub mod orchestrator;
pub mod privacy;
pub mod server;
pub mod state;

// Re-exports
pub use aggregators::{AggregatedUpdate, Aggregator};
pub use client::{Client, ClientComputation, ClientUpdate};
pub use config::{PrivacyMode, TrainingConfig};
pub use error::{FedError, Result};
pub use evaluator::{EvaluationMetrics, Evaluator};
pub use orchestrator::{RoundHistory, RoundMetrics, RoundOrchestrator, RoundPhase};
pub use privacy::{PrivacyConfig, PrivacyMechanism};
pub use server::{ServerAdam, ServerMomentum, ServerOptimizer, ServerSgd};
pub use state::{Checkpoint, ModelSnapshot, ModelState};
pub use tokio_util::sync::CancellationToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
