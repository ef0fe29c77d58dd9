//! Multinomial logistic regression: a single dense layer with softmax
//! cross-entropy loss.
//!
//! Parameters are `[weights (input_dim x num_classes), bias (num_classes)]`,
//! zero-initialized so every run starts from the same template.

use ndarray::{Array1, Array2, ArrayD, Axis, Ix1, Ix2};

use super::{Batch, BatchOutput, ModelProvider, ModelTemplate, Objective};
use crate::error::{FedError, Result};

/// Dense softmax classifier.
#[derive(Clone, Debug)]
pub struct SoftmaxRegression {
    input_dim: usize,
    num_classes: usize,
}

impl SoftmaxRegression {
    /// Create a classifier for `input_dim` features and `num_classes` labels.
    pub fn new(input_dim: usize, num_classes: usize) -> Self {
        Self {
            input_dim,
            num_classes,
        }
    }

    fn unpack<'a>(
        &self,
        params: &'a [ArrayD<f32>],
    ) -> Result<(ndarray::ArrayView2<'a, f32>, ndarray::ArrayView1<'a, f32>)> {
        if params.len() != 2 {
            return Err(FedError::DimensionMismatch(format!(
                "expected 2 parameter tensors, got {}",
                params.len()
            )));
        }
        let weights = params[0].view().into_dimensionality::<Ix2>()?;
        let bias = params[1].view().into_dimensionality::<Ix1>()?;
        if weights.dim() != (self.input_dim, self.num_classes) || bias.len() != self.num_classes {
            return Err(FedError::DimensionMismatch(format!(
                "weights {:?} / bias {} do not match {}x{}",
                weights.dim(),
                bias.len(),
                self.input_dim,
                self.num_classes
            )));
        }
        Ok((weights, bias))
    }
}

impl ModelProvider for SoftmaxRegression {
    fn create_model(&self) -> ModelTemplate {
        ModelTemplate {
            parameters: vec![
                Array2::<f32>::zeros((self.input_dim, self.num_classes)).into_dyn(),
                Array1::<f32>::zeros(self.num_classes).into_dyn(),
            ],
            input_shape: vec![self.input_dim],
        }
    }
}

impl Objective for SoftmaxRegression {
    fn loss_and_gradient(&self, params: &[ArrayD<f32>], batch: &Batch) -> Result<BatchOutput> {
        let (weights, bias) = self.unpack(params)?;
        let n = batch.len();
        if n == 0 {
            return Err(FedError::Configuration("empty batch".into()));
        }
        if batch.inputs.ncols() != self.input_dim {
            return Err(FedError::DimensionMismatch(format!(
                "input width {} != {}",
                batch.inputs.ncols(),
                self.input_dim
            )));
        }

        let mut probs = batch.inputs.dot(&weights) + &bias;
        let mut loss = 0.0f32;
        let mut correct = 0usize;
        for (mut row, &label) in probs.axis_iter_mut(Axis(0)).zip(&batch.labels) {
            if label >= self.num_classes {
                return Err(FedError::DimensionMismatch(format!(
                    "label {} out of range for {} classes",
                    label, self.num_classes
                )));
            }
            let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            row.mapv_inplace(|z| (z - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|e| e / sum);

            let predicted = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i);
            if predicted == Some(label) {
                correct += 1;
            }
            loss -= row[label].max(f32::MIN_POSITIVE).ln();
            // softmax output minus one-hot target
            row[label] -= 1.0;
        }

        let scale = 1.0 / n as f32;
        let grad_w = batch.inputs.t().dot(&probs) * scale;
        let grad_b = probs.sum_axis(Axis(0)) * scale;

        Ok(BatchOutput {
            loss: loss * scale,
            accuracy: correct as f32 * scale,
            gradient: vec![grad_w.into_dyn(), grad_b.into_dyn()],
        })
    }
}
