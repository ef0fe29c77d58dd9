//! Aggregation of client updates into one global delta.
//!
//! [`Aggregator::combine`] applies federated averaging over every accepted
//! [`ClientUpdate`]. No server-side noise is added: when local DP is active
//! each delta is already privatized at the client.

pub mod fedavg;

pub use fedavg::fedavg;

use tracing::debug;

use crate::client::ClientUpdate;
use crate::error::{FedError, Result};
use crate::math::Tensors;

/// Weighted delta produced and consumed within a single round.
#[derive(Clone, Debug)]
pub struct AggregatedUpdate {
    /// Example-weighted mean of client deltas.
    pub weighted_delta: Tensors,
    /// Sum of `num_examples` over contributing clients.
    pub total_examples: usize,
}

/// Federated averaging aggregator.
///
/// # Example
///
/// ```rust
/// use fedavg_dp::aggregators::Aggregator;
/// use fedavg_dp::client::ClientUpdate;
/// use ndarray::arr1;
/// use std::collections::BTreeMap;
///
/// let update = |id: &str, v: f32, n: usize| ClientUpdate {
///     client_id: id.to_string(),
///     delta: vec![arr1(&[v, v]).into_dyn()],
///     num_examples: n,
///     local_metrics: BTreeMap::new(),
/// };
///
/// let agg = Aggregator::new();
/// let result = agg
///     .combine(&[update("a", 1.0, 10), update("b", 2.0, 20), update("c", 3.0, 30)])
///     .unwrap();
/// assert!((result.weighted_delta[0][[0]] - 7.0 / 3.0).abs() < 1e-6);
/// assert_eq!(result.total_examples, 60);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Aggregator;

impl Aggregator {
    /// Create a new aggregator.
    pub fn new() -> Self {
        Self
    }

    /// Combine updates: `Σ(n_i · delta_i) / Σ n_i`, per tensor position.
    ///
    /// Fails with [`FedError::Aggregation`] if `updates` is empty or carries
    /// no examples, and with [`FedError::Numerical`] if the result is not finite.
    pub fn combine(&self, updates: &[ClientUpdate]) -> Result<AggregatedUpdate> {
        let total_examples: usize = updates.iter().map(|u| u.num_examples).sum();
        if updates.is_empty() || total_examples == 0 {
            return Err(FedError::Aggregation(format!(
                "{} update(s) with {} total examples",
                updates.len(),
                total_examples
            )));
        }

        let deltas: Vec<&[ndarray::ArrayD<f32>]> =
            updates.iter().map(|u| u.delta.as_slice()).collect();
        let weights: Vec<f64> = updates.iter().map(|u| u.num_examples as f64).collect();
        let weighted_delta = fedavg(&deltas, &weights)?;

        debug!(
            clients = updates.len(),
            total_examples, "combined client updates"
        );
        Ok(AggregatedUpdate {
            weighted_delta,
            total_examples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use std::collections::BTreeMap;

    fn update(id: &str, values: &[f32], n: usize) -> ClientUpdate {
        ClientUpdate {
            client_id: id.to_string(),
            delta: vec![arr1(values).into_dyn()],
            num_examples: n,
            local_metrics: BTreeMap::new(),
        }
    }

    #[test]
    fn test_combine_weighted() {
        let agg = Aggregator::new();
        let result = agg
            .combine(&[
                update("a", &[1.0, 1.0], 10),
                update("b", &[2.0, 2.0], 20),
                update("c", &[3.0, 3.0], 30),
            ])
            .unwrap();
        let expected = (10.0 * 1.0 + 20.0 * 2.0 + 30.0 * 3.0) / 60.0;
        assert!((result.weighted_delta[0][[0]] - expected).abs() < 1e-6);
        assert!((result.weighted_delta[0][[1]] - expected).abs() < 1e-6);
        assert_eq!(result.total_examples, 60);
    }

    #[test]
    fn test_combine_empty() {
        assert!(matches!(
            Aggregator::new().combine(&[]),
            Err(FedError::Aggregation(_))
        ));
    }

    #[test]
    fn test_combine_all_zero_examples() {
        let updates = vec![update("a", &[1.0], 0), update("b", &[2.0], 0)];
        assert!(matches!(
            Aggregator::new().combine(&updates),
            Err(FedError::Aggregation(_))
        ));
    }

    #[test]
    fn test_combine_single_client() {
        let result = Aggregator::new()
            .combine(&[update("solo", &[42.0, 7.0], 5)])
            .unwrap();
        assert_eq!(result.weighted_delta[0][[0]], 42.0);
        assert_eq!(result.weighted_delta[0][[1]], 7.0);
    }

    #[test]
    fn test_combine_non_finite() {
        let updates = vec![update("a", &[f32::INFINITY], 1), update("b", &[1.0], 1)];
        assert!(matches!(
            Aggregator::new().combine(&updates),
            Err(FedError::Numerical(_))
        ));
    }
}
