//! Client-local training.
//!
//! Each participant starts from the broadcast global parameters, runs
//! `local_epochs` passes over its own data and returns only the resulting
//! parameter delta. Every gradient step goes through the configured
//! [`PrivacyMechanism`], once per microbatch, before the local optimizer
//! consumes it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::ArrayD;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{FedError, Result};
use crate::math::{same_shapes, Tensors};
use crate::model::{Dataset, LocalOptimizer, Objective};
use crate::privacy::PrivacyMechanism;

/// Result of one client's local training for one round.
#[derive(Clone, Debug)]
pub struct ClientUpdate {
    /// Participant identifier.
    pub client_id: String,
    /// `final_local_parameters - global_parameters`.
    pub delta: Tensors,
    /// Local examples the update was trained on (aggregation weight).
    pub num_examples: usize,
    /// Local training metrics (`loss`, `accuracy`), for observability only.
    pub local_metrics: BTreeMap<String, f64>,
}

impl ClientUpdate {
    /// A local metric by name.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.local_metrics.get(name).copied()
    }
}

/// A registered participant and its private dataset.
#[derive(Clone)]
pub struct Client {
    id: String,
    dataset: Arc<dyn Dataset>,
}

impl Client {
    /// Register a client with its local data.
    pub fn new(id: impl Into<String>, dataset: impl Dataset + 'static) -> Self {
        Self::from_shared(id, Arc::new(dataset))
    }

    /// Register a client whose dataset is already shared.
    pub fn from_shared(id: impl Into<String>, dataset: Arc<dyn Dataset>) -> Self {
        Self {
            id: id.into(),
            dataset,
        }
    }

    /// Client identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Local dataset.
    pub fn dataset(&self) -> &dyn Dataset {
        self.dataset.as_ref()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("examples", &self.dataset.len())
            .finish()
    }
}

/// Local training procedure shared by every client.
#[derive(Clone)]
pub struct ClientComputation {
    objective: Arc<dyn Objective>,
    optimizer: Arc<dyn LocalOptimizer>,
    batch_size: usize,
}

impl ClientComputation {
    /// Create a local training procedure.
    pub fn new(
        objective: Arc<dyn Objective>,
        optimizer: Arc<dyn LocalOptimizer>,
        batch_size: usize,
    ) -> Self {
        Self {
            objective,
            optimizer,
            batch_size: batch_size.max(1),
        }
    }

    /// Train `client` locally starting from `global_parameters`.
    ///
    /// Fails with [`FedError::EmptyClient`] if the client has no examples and
    /// with [`FedError::Cancelled`] as soon as `cancel` fires between steps.
    pub fn run<R: Rng + ?Sized>(
        &self,
        client: &Client,
        global_parameters: &[ArrayD<f32>],
        privacy_mechanism: &PrivacyMechanism,
        local_epochs: usize,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<ClientUpdate> {
        let dataset = client.dataset();
        if dataset.is_empty() {
            return Err(FedError::EmptyClient {
                client_id: client.id().to_string(),
            });
        }

        let num_microbatches = privacy_mechanism.num_microbatches();
        let mut params: Tensors = global_parameters.to_vec();
        let mut loss_sum = 0.0f64;
        let mut acc_sum = 0.0f64;
        let mut seen = 0usize;

        for _ in 0..local_epochs {
            for batch in dataset.batches(self.batch_size) {
                if cancel.is_cancelled() {
                    return Err(FedError::Cancelled);
                }
                if batch.is_empty() {
                    continue;
                }

                let mut gradients = Vec::with_capacity(num_microbatches);
                for microbatch in batch.split(num_microbatches) {
                    let out = self.objective.loss_and_gradient(&params, &microbatch)?;
                    if !same_shapes(&out.gradient, &params) {
                        return Err(FedError::DimensionMismatch(format!(
                            "client {} produced a gradient shaped unlike the model",
                            client.id()
                        )));
                    }
                    let n = microbatch.len() as f64;
                    loss_sum += out.loss as f64 * n;
                    acc_sum += out.accuracy as f64 * n;
                    seen += microbatch.len();
                    gradients.push(out.gradient);
                }

                let gradient = privacy_mechanism.process_microbatches(gradients, rng)?;
                self.optimizer.step(&mut params, &gradient);
            }
        }

        let delta: Tensors = params
            .into_iter()
            .zip(global_parameters)
            .map(|(local, global)| local - global)
            .collect();

        let mut local_metrics = BTreeMap::new();
        if seen > 0 {
            local_metrics.insert("loss".to_string(), loss_sum / seen as f64);
            local_metrics.insert("accuracy".to_string(), acc_sum / seen as f64);
        }

        debug!(
            client = client.id(),
            examples = dataset.len(),
            private = privacy_mechanism.is_private(),
            "local training finished"
        );

        Ok(ClientUpdate {
            client_id: client.id().to_string(),
            delta,
            num_examples: dataset.len(),
            local_metrics,
        })
    }
}
