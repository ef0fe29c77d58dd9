//! Held-out evaluation of a trained model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FedError, Result};
use crate::model::{Dataset, Objective};
use crate::state::ModelSnapshot;

/// Loss and accuracy on a held-out dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Round of the evaluated snapshot.
    pub round: u64,
    /// Mean loss.
    pub loss: f32,
    /// Fraction of correct predictions.
    pub accuracy: f32,
    /// Examples evaluated.
    pub num_examples: usize,
}

/// Applies a model snapshot to a test dataset.
#[derive(Clone)]
pub struct Evaluator {
    objective: Arc<dyn Objective>,
}

impl Evaluator {
    /// Create an evaluator for `objective`.
    pub fn new(objective: Arc<dyn Objective>) -> Self {
        Self { objective }
    }

    /// Evaluate `snapshot` on `test_dataset`.
    pub fn evaluate(
        &self,
        snapshot: &ModelSnapshot,
        test_dataset: &dyn Dataset,
    ) -> Result<EvaluationMetrics> {
        if test_dataset.is_empty() {
            return Err(FedError::Configuration("test dataset is empty".into()));
        }
        let (loss, accuracy) = self.objective.evaluate(snapshot.parameters(), test_dataset)?;
        info!(
            round = snapshot.round(),
            loss, accuracy, "evaluated model"
        );
        Ok(EvaluationMetrics {
            round: snapshot.round(),
            loss,
            accuracy,
            num_examples: test_dataset.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InMemoryDataset, ModelProvider, SoftmaxRegression};
    use crate::state::ModelState;
    use ndarray::array;

    #[test]
    fn test_evaluate_initial_model() {
        let model = Arc::new(SoftmaxRegression::new(2, 2));
        let state = ModelState::initialize(&model.create_model()).unwrap();
        let test = InMemoryDataset::new(array![[1.0, 0.0], [0.0, 1.0]], vec![0, 1]).unwrap();
        let metrics = Evaluator::new(model).evaluate(&state.snapshot(), &test).unwrap();
        assert_eq!(metrics.round, 0);
        assert_eq!(metrics.num_examples, 2);
        assert!((metrics.loss - 2.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_evaluate_empty_dataset() {
        let model = Arc::new(SoftmaxRegression::new(2, 2));
        let state = ModelState::initialize(&model.create_model()).unwrap();
        let result = Evaluator::new(model).evaluate(&state.snapshot(), &InMemoryDataset::empty(2));
        assert!(matches!(result, Err(FedError::Configuration(_))));
    }
}
