//! Adaptive server optimizer (FedAdam, Reddi et al. 2021).
//!
//! The aggregated delta plays the role of a negative pseudo-gradient:
//!
//! ```text
//! m = β1·m + (1-β1)·Δ
//! v = β2·v + (1-β2)·Δ²
//! x = x + lr · m̂ / (sqrt(v̂) + τ)
//! ```
//!
//! with the usual bias correction on `m̂` and `v̂`.

use crate::aggregators::AggregatedUpdate;
use crate::error::Result;
use crate::math::{same_shapes, zeros_like};
use crate::state::{ModelState, ServerOptimizerState};

use super::ServerOptimizer;

/// FedAdam server optimizer.
#[derive(Clone, Debug)]
pub struct ServerAdam {
    /// Server learning rate.
    pub learning_rate: f32,
    /// First moment decay.
    pub beta1: f32,
    /// Second moment decay.
    pub beta2: f32,
    /// Adaptivity term added to the denominator.
    pub tau: f32,
}

impl ServerAdam {
    /// Create a FedAdam optimizer.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, tau: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            tau,
        }
    }
}

impl ServerOptimizer for ServerAdam {
    fn update(&self, state: &ModelState, update: &AggregatedUpdate) -> Result<ModelState> {
        let delta = &update.weighted_delta;
        let (mut m, mut v, step) = match state.server_optimizer_state() {
            ServerOptimizerState::Adam { m, v, step }
                if same_shapes(m, delta) && same_shapes(v, delta) =>
            {
                (m.clone(), v.clone(), *step)
            }
            _ => (zeros_like(delta), zeros_like(delta), 0),
        };
        let step = step + 1;

        for ((m, v), d) in m.iter_mut().zip(v.iter_mut()).zip(delta) {
            m.zip_mut_with(d, |m, &d| *m = self.beta1 * *m + (1.0 - self.beta1) * d);
            v.zip_mut_with(d, |v, &d| *v = self.beta2 * *v + (1.0 - self.beta2) * d * d);
        }

        let bias1 = 1.0 - self.beta1.powi(step as i32);
        let bias2 = 1.0 - self.beta2.powi(step as i32);
        let parameters = state
            .parameters()
            .iter()
            .zip(m.iter().zip(&v))
            .map(|(p, (m, v))| {
                let mut next = p.clone();
                ndarray::Zip::from(&mut next)
                    .and(m)
                    .and(v)
                    .for_each(|x, &m, &v| {
                        let m_hat = m / bias1;
                        let v_hat = v / bias2;
                        *x += self.learning_rate * m_hat / (v_hat.sqrt() + self.tau);
                    });
                next
            })
            .collect();

        state.advance(parameters, ServerOptimizerState::Adam { m, v, step })
    }

    fn name(&self) -> &'static str {
        "adam"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::{agg, state};

    #[test]
    fn test_first_step_is_sign_scaled() {
        // With bias correction the first step is lr * Δ / (|Δ| + τ) ≈ lr * sign(Δ)
        let opt = ServerAdam::new(0.1, 0.9, 0.99, 1e-8);
        let next = opt.update(&state(&[0.0, 0.0]), &agg(&[5.0, -0.01])).unwrap();
        assert!((next.parameters()[0][[0]] - 0.1).abs() < 1e-4);
        assert!((next.parameters()[0][[1]] + 0.1).abs() < 1e-4);
    }

    #[test]
    fn test_step_counter() {
        let opt = ServerAdam::new(0.1, 0.9, 0.99, 1e-3);
        let s1 = opt.update(&state(&[0.0]), &agg(&[1.0])).unwrap();
        let s2 = opt.update(&s1, &agg(&[1.0])).unwrap();
        assert!(matches!(
            s2.server_optimizer_state(),
            ServerOptimizerState::Adam { step: 2, .. }
        ));
        assert!(s2.parameters()[0][[0]] > s1.parameters()[0][[0]]);
    }
}
