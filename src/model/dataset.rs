//! In-memory dataset backed by an ndarray feature matrix.

use ndarray::{s, Array2};

use super::{Batch, Dataset};
use crate::error::{FedError, Result};

/// Features and labels held in memory, batched in order.
#[derive(Clone, Debug)]
pub struct InMemoryDataset {
    features: Array2<f32>,
    labels: Vec<usize>,
}

impl InMemoryDataset {
    /// Build a dataset from a `(n, input_dim)` feature matrix and `n` labels.
    pub fn new(features: Array2<f32>, labels: Vec<usize>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(FedError::Configuration(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    /// A dataset with no examples.
    pub fn empty(input_dim: usize) -> Self {
        Self {
            features: Array2::zeros((0, input_dim)),
            labels: Vec::new(),
        }
    }

    /// Width of one example.
    pub fn input_dim(&self) -> usize {
        self.features.ncols()
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn batches(&self, batch_size: usize) -> Vec<Batch> {
        let batch_size = batch_size.max(1);
        (0..self.len())
            .step_by(batch_size)
            .map(|start| {
                let end = (start + batch_size).min(self.len());
                Batch {
                    inputs: self.features.slice(s![start..end, ..]).to_owned(),
                    labels: self.labels[start..end].to_vec(),
                }
            })
            .collect()
    }
}
