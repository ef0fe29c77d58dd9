//! FedAvg weighted aggregation over tensor sequences
//!
//! Standard federated averaging as described by McMahan et al. (2017):
//! every position of the parameter sequence is averaged independently,
//! weighted by each client's local example count.

use ndarray::ArrayD;

use crate::error::{FedError, Result};
use crate::math::{all_finite, same_shapes, Tensors};

/// Weighted mean `Σ(w_i · d_i) / Σ w_i` of tensor sequences.
///
/// Accumulation happens in f64, so the result does not depend on the order
/// of `deltas` beyond final f32 rounding.
///
/// # Arguments
///
/// * `deltas` - One tensor sequence per client, all identically shaped
/// * `weights` - One non-negative weight per client (e.g. example counts)
pub fn fedavg(deltas: &[&[ArrayD<f32>]], weights: &[f64]) -> Result<Tensors> {
    if deltas.is_empty() {
        return Err(FedError::Aggregation("no client updates to aggregate".into()));
    }
    if weights.len() != deltas.len() {
        return Err(FedError::DimensionMismatch(format!(
            "{} weights for {} updates",
            weights.len(),
            deltas.len()
        )));
    }

    let reference = deltas[0];
    for delta in &deltas[1..] {
        if !same_shapes(delta, reference) {
            return Err(FedError::DimensionMismatch(
                "client deltas have inconsistent shapes".into(),
            ));
        }
    }

    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 || !weight_sum.is_finite() {
        return Err(FedError::Aggregation(format!(
            "total weight is {}, nothing to average",
            weight_sum
        )));
    }

    let mut acc: Vec<ArrayD<f64>> = reference
        .iter()
        .map(|t| ArrayD::zeros(t.raw_dim()))
        .collect();
    for (delta, &w) in deltas.iter().zip(weights) {
        for (a, d) in acc.iter_mut().zip(delta.iter()) {
            a.zip_mut_with(d, |a, &d| *a += w * d as f64);
        }
    }

    let result: Tensors = acc
        .into_iter()
        .map(|a| a.mapv(|x| (x / weight_sum) as f32))
        .collect();

    if !all_finite(&result) {
        return Err(FedError::Numerical(
            "aggregated delta contains non-finite values".into(),
        ));
    }
    Ok(result)
}
