//! Round-based federated training driver.
//!
//! [`RoundOrchestrator`] is the sole owner and only writer of the global
//! [`ModelState`]. Each round walks the state machine
//!
//! ```text
//! Broadcasting -> AwaitingClientResults -> Aggregating -> Updating -> RoundComplete
//! ```
//!
//! and either publishes a new state (round + 1) or abandons the round with
//! the previous state intact. Clients train on a bounded rayon pool; the
//! parallel collect is the barrier, so aggregation never sees a partial set.

pub mod metrics;

pub use metrics::{RoundHistory, RoundMetrics};

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregators::Aggregator;
use crate::client::{Client, ClientComputation, ClientUpdate};
use crate::config::TrainingConfig;
use crate::error::{FedError, Result};
use crate::math::same_shapes;
use crate::model::{LocalOptimizer, ModelProvider, Objective, Sgd};
use crate::privacy::PrivacyMechanism;
use crate::server::ServerOptimizer;
use crate::state::{self, Checkpoint, ModelSnapshot, ModelState};

/// Position in the round state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    /// State initialized, no round started.
    Initialized,
    /// Publishing the current snapshot to clients.
    Broadcasting,
    /// Waiting on every dispatched client.
    AwaitingClientResults,
    /// Combining accepted updates.
    Aggregating,
    /// Producing the next model state.
    Updating,
    /// Round finished (completed or aborted).
    RoundComplete,
    /// Requested rounds done, or training cancelled.
    Terminated,
}

/// Derive an independent, reproducible seed per `(base, round, client)`.
fn client_seed(base: u64, round: u64, client_index: usize) -> u64 {
    // splitmix64 finalizer
    let mut z = base
        ^ round.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (client_index as u64).wrapping_add(1).wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Drives broadcast, local training, aggregation and server update.
pub struct RoundOrchestrator {
    config: TrainingConfig,
    state: ModelState,
    clients: Vec<Client>,
    computation: ClientComputation,
    objective: Arc<dyn Objective>,
    privacy: PrivacyMechanism,
    aggregator: Aggregator,
    server_optimizer: Box<dyn ServerOptimizer>,
    pool: ThreadPool,
    cancel: CancellationToken,
    phase: RoundPhase,
    history: RoundHistory,
}

impl RoundOrchestrator {
    /// Validate `config` and initialize round-0 state from `provider`.
    ///
    /// All configuration failures surface here, before any training work.
    pub fn new(
        config: TrainingConfig,
        provider: &dyn ModelProvider,
        objective: Arc<dyn Objective>,
        clients: Vec<Client>,
    ) -> Result<Self> {
        let state = ModelState::initialize(&provider.create_model())?;
        Self::with_state(config, state, objective, clients)
    }

    /// Resume from a checkpoint, checking it against the model template.
    pub fn resume(
        config: TrainingConfig,
        provider: &dyn ModelProvider,
        objective: Arc<dyn Objective>,
        clients: Vec<Client>,
        checkpoint: Checkpoint,
    ) -> Result<Self> {
        let template = provider.create_model();
        if !same_shapes(&checkpoint.parameters, &template.parameters) {
            return Err(FedError::Configuration(
                "checkpoint parameters do not match the model template".into(),
            ));
        }
        let state = state::restore(checkpoint)?;
        info!(round = state.round(), "resuming from checkpoint");
        Self::with_state(config, state, objective, clients)
    }

    fn with_state(
        config: TrainingConfig,
        state: ModelState,
        objective: Arc<dyn Objective>,
        clients: Vec<Client>,
    ) -> Result<Self> {
        config.validate()?;
        if clients.len() != config.num_clients {
            return Err(FedError::Configuration(format!(
                "configured for {} clients, {} registered",
                config.num_clients,
                clients.len()
            )));
        }
        let privacy = config.privacy_mechanism()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_parallel_clients)
            .thread_name(|i| format!("fl-client-{}", i))
            .build()
            .map_err(|e| FedError::Configuration(e.to_string()))?;
        let computation = ClientComputation::new(
            Arc::clone(&objective),
            Arc::new(Sgd::new(config.client_learning_rate)),
            config.batch_size,
        );

        info!(
            clients = clients.len(),
            private = privacy.is_private(),
            max_parallel = config.max_parallel_clients,
            "orchestrator initialized"
        );

        Ok(Self {
            server_optimizer: config.build_server_optimizer(),
            config,
            state,
            clients,
            computation,
            objective,
            privacy,
            aggregator: Aggregator::new(),
            pool,
            cancel: CancellationToken::new(),
            phase: RoundPhase::Initialized,
            history: RoundHistory::new(),
        })
    }

    /// Replace the server optimizer rule.
    pub fn with_server_optimizer(mut self, optimizer: Box<dyn ServerOptimizer>) -> Self {
        self.server_optimizer = optimizer;
        self
    }

    /// Replace the client-side optimizer (plain SGD by default).
    pub fn with_local_optimizer(mut self, optimizer: Arc<dyn LocalOptimizer>) -> Self {
        self.computation = ClientComputation::new(
            Arc::clone(&self.objective),
            optimizer,
            self.config.batch_size,
        );
        self
    }

    /// Observe an externally owned cancellation token instead of a private one.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops training when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current global state.
    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// Read-only view of the current global state.
    pub fn snapshot(&self) -> ModelSnapshot {
        self.state.snapshot()
    }

    /// Current state-machine phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Every round recorded so far.
    pub fn history(&self) -> &RoundHistory {
        &self.history
    }

    /// Checkpoint of the current state.
    pub fn checkpoint(&self) -> Checkpoint {
        state::checkpoint(&self.state)
    }

    /// Run `config.num_rounds` rounds.
    pub fn run(&mut self) -> Result<Vec<RoundMetrics>> {
        self.run_rounds(self.config.num_rounds)
    }

    /// Run `num_rounds` rounds, returning one record per round (aborted
    /// rounds included).
    ///
    /// Only cancellation ends the call early, with [`FedError::Cancelled`];
    /// the state then stays at the last completed round.
    pub fn run_rounds(&mut self, num_rounds: usize) -> Result<Vec<RoundMetrics>> {
        let mut records = Vec::with_capacity(num_rounds);
        for _ in 0..num_rounds {
            records.push(self.run_round()?);
        }
        self.transition(RoundPhase::Terminated);
        Ok(records)
    }

    /// Run a single round.
    pub fn run_round(&mut self) -> Result<RoundMetrics> {
        let attempt = self.history.len() + 1;
        self.check_cancelled()?;

        self.transition(RoundPhase::Broadcasting);
        let snapshot = self.state.snapshot();

        self.transition(RoundPhase::AwaitingClientResults);
        let outcomes = self.dispatch(&snapshot);
        self.check_cancelled()?;

        let (accepted, excluded) = self.collect(outcomes, &snapshot);
        let (aggregate_loss, aggregate_accuracy) = weighted_local_metrics(&accepted);

        self.transition(RoundPhase::Aggregating);
        let outcome = self
            .aggregator
            .combine(&accepted)
            .and_then(|aggregated| {
                self.transition(RoundPhase::Updating);
                self.server_optimizer.update(&self.state, &aggregated)
            });

        let failure = match outcome {
            Ok(next) => {
                self.state = next;
                None
            }
            Err(e) => {
                warn!(round = attempt, error = %e, "round aborted, model state unchanged");
                Some(e.to_string())
            }
        };

        self.transition(RoundPhase::RoundComplete);
        let metrics = RoundMetrics {
            round: attempt,
            model_round: self.state.round(),
            accepted_clients: accepted.len(),
            excluded_clients: excluded,
            aggregate_loss,
            aggregate_accuracy,
            aborted: failure.is_some(),
            failure,
        };
        info!(
            round = metrics.round,
            model_round = metrics.model_round,
            accepted = metrics.accepted_clients,
            excluded = metrics.excluded_clients,
            loss = metrics.aggregate_loss,
            accuracy = metrics.aggregate_accuracy,
            aborted = metrics.aborted,
            "round complete"
        );
        self.history.push(metrics.clone());
        Ok(metrics)
    }

    fn transition(&mut self, next: RoundPhase) {
        debug!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(
                model_round = self.state.round(),
                "training cancelled, keeping last completed state"
            );
            self.transition(RoundPhase::Terminated);
            return Err(FedError::Cancelled);
        }
        Ok(())
    }

    /// Train every client on the pool; returns once all have finished.
    fn dispatch(&self, snapshot: &ModelSnapshot) -> Vec<Result<ClientUpdate>> {
        let seed = self.config.seed;
        let epochs = self.config.local_epochs;
        self.pool.install(|| {
            self.clients
                .par_iter()
                .enumerate()
                .map(|(i, client)| {
                    let mut rng = StdRng::seed_from_u64(client_seed(seed, snapshot.round(), i));
                    self.computation.run(
                        client,
                        snapshot.parameters(),
                        &self.privacy,
                        epochs,
                        &mut rng,
                        &self.cancel,
                    )
                })
                .collect()
        })
    }

    /// Split outcomes into accepted updates and a count of exclusions.
    fn collect(
        &self,
        outcomes: Vec<Result<ClientUpdate>>,
        snapshot: &ModelSnapshot,
    ) -> (Vec<ClientUpdate>, usize) {
        let mut accepted = Vec::with_capacity(outcomes.len());
        let mut excluded = 0;
        for (client, outcome) in self.clients.iter().zip(outcomes) {
            match outcome {
                Ok(update)
                    if update.num_examples > 0
                        && same_shapes(&update.delta, snapshot.parameters()) =>
                {
                    accepted.push(update)
                }
                Ok(_) => {
                    warn!(client = client.id(), "malformed update excluded");
                    excluded += 1;
                }
                Err(FedError::EmptyClient { client_id }) => {
                    debug!(client = %client_id, "client has no data, excluded");
                    excluded += 1;
                }
                Err(e) => {
                    warn!(client = client.id(), error = %e, "client failed, excluded");
                    excluded += 1;
                }
            }
        }
        (accepted, excluded)
    }
}

/// Example-weighted mean of the `loss` and `accuracy` local metrics.
fn weighted_local_metrics(updates: &[ClientUpdate]) -> (Option<f64>, Option<f64>) {
    let weighted = |name: &str| {
        let mut sum = 0.0;
        let mut weight = 0.0;
        for u in updates {
            if let Some(value) = u.metric(name) {
                sum += value * u.num_examples as f64;
                weight += u.num_examples as f64;
            }
        }
        (weight > 0.0).then(|| sum / weight)
    };
    (weighted("loss"), weighted("accuracy"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InMemoryDataset, SoftmaxRegression};
    use ndarray::Array2;

    fn dataset(n: usize) -> InMemoryDataset {
        let features = Array2::from_shape_fn((n, 2), |(i, j)| if i % 2 == j { 1.0 } else { 0.0 });
        InMemoryDataset::new(features, (0..n).map(|i| i % 2).collect()).unwrap()
    }

    fn config(num_clients: usize) -> TrainingConfig {
        TrainingConfig {
            num_clients,
            local_epochs: 1,
            batch_size: 4,
            client_learning_rate: 0.1,
            max_parallel_clients: 2,
            ..TrainingConfig::default()
        }
    }

    fn orchestrator(sizes: &[usize]) -> RoundOrchestrator {
        let model = Arc::new(SoftmaxRegression::new(2, 2));
        let clients = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| Client::new(format!("client_{}", i), dataset(n)))
            .collect();
        RoundOrchestrator::new(config(sizes.len()), model.as_ref(), model.clone(), clients).unwrap()
    }

    #[test]
    fn test_client_seed_distinct() {
        assert_ne!(client_seed(0, 0, 0), client_seed(0, 0, 1));
        assert_ne!(client_seed(0, 0, 0), client_seed(0, 1, 0));
        assert_eq!(client_seed(5, 3, 2), client_seed(5, 3, 2));
    }

    #[test]
    fn test_phase_lifecycle() {
        let mut orch = orchestrator(&[4, 4]);
        assert_eq!(orch.phase(), RoundPhase::Initialized);
        orch.run_round().unwrap();
        assert_eq!(orch.phase(), RoundPhase::RoundComplete);
        orch.run_rounds(1).unwrap();
        assert_eq!(orch.phase(), RoundPhase::Terminated);
    }

    #[test]
    fn test_round_advances_state() {
        let mut orch = orchestrator(&[4, 6]);
        let metrics = orch.run_rounds(3).unwrap();
        assert_eq!(metrics.len(), 3);
        assert_eq!(orch.state().round(), 3);
        assert!(metrics.iter().all(|m| !m.aborted && m.accepted_clients == 2));
        assert_eq!(orch.history().len(), 3);
    }

    #[test]
    fn test_all_empty_clients_abort() {
        let mut orch = orchestrator(&[0, 0]);
        let before = orch.snapshot();
        let metrics = orch.run_round().unwrap();
        assert!(metrics.aborted);
        assert_eq!(metrics.excluded_clients, 2);
        assert_eq!(metrics.model_round, 0);
        assert_eq!(metrics.aggregate_loss, None);
        assert_eq!(orch.state().parameters(), before.parameters());
    }

    #[test]
    fn test_client_count_mismatch() {
        let model = Arc::new(SoftmaxRegression::new(2, 2));
        let clients = vec![Client::new("only", dataset(2))];
        let result = RoundOrchestrator::new(config(3), model.as_ref(), model.clone(), clients);
        assert!(matches!(result, Err(FedError::Configuration(_))));
    }

    #[test]
    fn test_cancel_before_round() {
        let mut orch = orchestrator(&[4]);
        orch.cancellation_token().cancel();
        assert!(matches!(orch.run_rounds(2), Err(FedError::Cancelled)));
        assert_eq!(orch.phase(), RoundPhase::Terminated);
        assert_eq!(orch.state().round(), 0);
        assert!(orch.history().is_empty());
    }

    #[test]
    fn test_weighted_local_metrics() {
        use std::collections::BTreeMap;
        let update = |loss: f64, n: usize| ClientUpdate {
            client_id: "c".into(),
            delta: vec![],
            num_examples: n,
            local_metrics: BTreeMap::from([("loss".to_string(), loss)]),
        };
        let (loss, acc) = weighted_local_metrics(&[update(1.0, 1), update(4.0, 3)]);
        assert!((loss.unwrap() - 3.25).abs() < 1e-12);
        assert_eq!(acc, None);
    }
}
