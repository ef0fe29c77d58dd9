//! Collaborator contracts consumed by the training core.
//!
//! The core never defines a network architecture or loads data itself. It
//! drives whatever implements these traits:
//!
//! - [`ModelProvider`] supplies the initial parameter template
//! - [`Dataset`] supplies `(input, label)` batches for one client
//! - [`Objective`] computes a loss, accuracy and gradient for one (micro)batch
//! - [`LocalOptimizer`] applies one gradient step to local parameters
//!
//! [`SoftmaxRegression`] and [`InMemoryDataset`] are small reference
//! implementations used by the demo and the tests.

pub mod dataset;
pub mod softmax;

pub use dataset::InMemoryDataset;
pub use softmax::SoftmaxRegression;

use ndarray::{s, Array2, ArrayD};

use crate::error::{FedError, Result};
use crate::math::Tensors;

/// Initial parameters and the expected input shape of a model.
#[derive(Clone, Debug)]
pub struct ModelTemplate {
    /// Initial parameter tensors, one per layer.
    pub parameters: Tensors,
    /// Shape of a single input example (without the batch axis).
    pub input_shape: Vec<usize>,
}

/// Produces the parameter template a training run starts from.
pub trait ModelProvider {
    /// Create a fresh model template.
    fn create_model(&self) -> ModelTemplate;
}

/// A batch of examples: one row of `inputs` per label.
#[derive(Clone, Debug)]
pub struct Batch {
    /// Input features, shape `(n, input_dim)`.
    pub inputs: Array2<f32>,
    /// Class labels, length `n`.
    pub labels: Vec<usize>,
}

impl Batch {
    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch holds no examples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Split into at most `num_microbatches` contiguous microbatches.
    ///
    /// Sizes differ by at most one example; empty pieces are dropped, so a
    /// batch smaller than `num_microbatches` yields one microbatch per example.
    pub fn split(&self, num_microbatches: usize) -> Vec<Batch> {
        let n = self.len();
        let m = num_microbatches.max(1).min(n.max(1));
        if m == 1 {
            return vec![self.clone()];
        }

        let base = n / m;
        let extra = n % m;
        let mut out = Vec::with_capacity(m);
        let mut start = 0;
        for i in 0..m {
            let size = base + usize::from(i < extra);
            if size == 0 {
                continue;
            }
            let end = start + size;
            out.push(Batch {
                inputs: self.inputs.slice(s![start..end, ..]).to_owned(),
                labels: self.labels[start..end].to_vec(),
            });
            start = end;
        }
        out
    }
}

/// A client-local (or held-out) dataset.
pub trait Dataset: Send + Sync {
    /// Number of examples.
    fn len(&self) -> usize;

    /// Whether the dataset holds no examples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All examples, grouped into batches of at most `batch_size`.
    fn batches(&self, batch_size: usize) -> Vec<Batch>;
}

/// Output of a single forward/backward pass.
#[derive(Clone, Debug)]
pub struct BatchOutput {
    /// Mean loss over the batch.
    pub loss: f32,
    /// Fraction of correctly classified examples.
    pub accuracy: f32,
    /// Gradient of the mean loss, shaped like the parameters.
    pub gradient: Tensors,
}

/// Loss and gradient computation for a fixed architecture.
pub trait Objective: Send + Sync {
    /// Compute loss, accuracy and gradient of `params` on `batch`.
    fn loss_and_gradient(&self, params: &[ArrayD<f32>], batch: &Batch) -> Result<BatchOutput>;

    /// Example-weighted `(loss, accuracy)` of `params` over a whole dataset.
    fn evaluate(&self, params: &[ArrayD<f32>], dataset: &dyn Dataset) -> Result<(f32, f32)> {
        let mut loss_sum = 0.0f64;
        let mut acc_sum = 0.0f64;
        let mut seen = 0usize;
        for batch in dataset.batches(dataset.len().max(1)) {
            if batch.is_empty() {
                continue;
            }
            let out = self.loss_and_gradient(params, &batch)?;
            loss_sum += out.loss as f64 * batch.len() as f64;
            acc_sum += out.accuracy as f64 * batch.len() as f64;
            seen += batch.len();
        }
        if seen == 0 {
            return Err(FedError::Configuration(
                "cannot evaluate on an empty dataset".into(),
            ));
        }
        Ok(((loss_sum / seen as f64) as f32, (acc_sum / seen as f64) as f32))
    }
}

/// A local optimizer driven one (privatized) gradient at a time.
pub trait LocalOptimizer: Send + Sync {
    /// Update `params` in place from `gradient`.
    fn step(&self, params: &mut [ArrayD<f32>], gradient: &[ArrayD<f32>]);
}

/// Plain stochastic gradient descent.
#[derive(Clone, Debug)]
pub struct Sgd {
    /// Step size.
    pub learning_rate: f32,
}

impl Sgd {
    /// Create an SGD optimizer.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl LocalOptimizer for Sgd {
    fn step(&self, params: &mut [ArrayD<f32>], gradient: &[ArrayD<f32>]) {
        for (p, g) in params.iter_mut().zip(gradient) {
            p.scaled_add(-self.learning_rate, g);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, array};

    fn batch_of(n: usize) -> Batch {
        Batch {
            inputs: Array2::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f32),
            labels: (0..n).collect(),
        }
    }

    #[test]
    fn test_split_even() {
        let parts = batch_of(6).split(3);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|b| b.len() == 2));
        assert_eq!(parts[1].labels, vec![2, 3]);
        assert_eq!(parts[1].inputs, array![[4.0f32, 5.0], [6.0, 7.0]]);
    }

    #[test]
    fn test_split_uneven() {
        let sizes: Vec<usize> = batch_of(7).split(3).iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
    }

    #[test]
    fn test_split_more_microbatches_than_examples() {
        let parts = batch_of(2).split(5);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn test_split_one_is_identity() {
        let parts = batch_of(4).split(1);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].labels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sgd_step() {
        let mut params = vec![arr1(&[1.0f32, 2.0]).into_dyn()];
        let grad = vec![arr1(&[10.0f32, -10.0]).into_dyn()];
        Sgd::new(0.1).step(&mut params, &grad);
        assert!((params[0][[0]] - 0.0).abs() < 1e-6);
        assert!((params[0][[1]] - 3.0).abs() < 1e-6);
    }
}
