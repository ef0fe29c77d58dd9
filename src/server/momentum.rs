//! Server momentum (FedAvgM, Hsu et al. 2019).

use crate::aggregators::AggregatedUpdate;
use crate::error::Result;
use crate::math::{same_shapes, zeros_like};
use crate::state::{ModelState, ServerOptimizerState};

use super::ServerOptimizer;

/// `v = β·v + Δ`, then `x = x + lr·v`.
#[derive(Clone, Debug)]
pub struct ServerMomentum {
    /// Server learning rate.
    pub learning_rate: f32,
    /// Momentum coefficient `β`.
    pub momentum: f32,
}

impl ServerMomentum {
    /// Create a momentum optimizer.
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
        }
    }
}

impl ServerOptimizer for ServerMomentum {
    fn update(&self, state: &ModelState, update: &AggregatedUpdate) -> Result<ModelState> {
        let delta = &update.weighted_delta;
        // A restored or freshly initialized state starts from zero velocity
        let mut velocity = match state.server_optimizer_state() {
            ServerOptimizerState::Momentum { velocity } if same_shapes(velocity, delta) => {
                velocity.clone()
            }
            _ => zeros_like(delta),
        };

        for (v, d) in velocity.iter_mut().zip(delta) {
            v.zip_mut_with(d, |v, &d| *v = self.momentum * *v + d);
        }

        let parameters = state
            .parameters()
            .iter()
            .zip(&velocity)
            .map(|(p, v)| {
                let mut next = p.clone();
                next.scaled_add(self.learning_rate, v);
                next
            })
            .collect();

        state.advance(parameters, ServerOptimizerState::Momentum { velocity })
    }

    fn name(&self) -> &'static str {
        "momentum"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::{agg, state};
    use ndarray::arr1;

    #[test]
    fn test_first_step_matches_sgd() {
        let next = ServerMomentum::new(1.0, 0.9)
            .update(&state(&[0.0]), &agg(&[1.0]))
            .unwrap();
        assert_eq!(next.parameters()[0], arr1(&[1.0f32]).into_dyn());
    }

    #[test]
    fn test_velocity_accumulates() {
        let opt = ServerMomentum::new(1.0, 0.5);
        let s1 = opt.update(&state(&[0.0]), &agg(&[1.0])).unwrap();
        let s2 = opt.update(&s1, &agg(&[1.0])).unwrap();
        // v1 = 1, v2 = 0.5 + 1 = 1.5 -> x = 1 + 1.5
        assert!((s2.parameters()[0][[0]] - 2.5).abs() < 1e-6);
        assert_eq!(s2.round(), 2);
        match s2.server_optimizer_state() {
            ServerOptimizerState::Momentum { velocity } => {
                assert!((velocity[0][[0]] - 1.5).abs() < 1e-6)
            }
            other => panic!("unexpected state {:?}", other),
        }
    }
}
