//! Checkpoint persistence for resuming training.
//!
//! Only the round counter and parameters are stored. Server optimizer state
//! restarts empty after a restore.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ModelState;
use crate::error::Result;
use crate::math::Tensors;

/// Serialized form of a [`ModelState`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Completed rounds at the time of the checkpoint.
    pub round: u64,
    /// Parameter tensors.
    pub parameters: Tensors,
}

/// Capture `state` as a checkpoint.
pub fn checkpoint(state: &ModelState) -> Checkpoint {
    Checkpoint {
        round: state.round(),
        parameters: state.parameters().to_vec(),
    }
}

/// Rebuild a [`ModelState`] from a checkpoint.
///
/// Fails with a configuration error if the parameters are empty or non-finite.
pub fn restore(checkpoint: Checkpoint) -> Result<ModelState> {
    ModelState::at_round(checkpoint.parameters, checkpoint.round)
}

impl Checkpoint {
    /// Serialize the checkpoint to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a checkpoint from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the checkpoint to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a checkpoint from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FedError;
    use crate::model::ModelTemplate;
    use ndarray::{arr1, arr2};

    fn state() -> ModelState {
        let template = ModelTemplate {
            parameters: vec![
                arr2(&[[1.0f32, 2.0], [3.0, 4.0]]).into_dyn(),
                arr1(&[0.5f32, -0.5]).into_dyn(),
            ],
            input_shape: vec![2],
        };
        ModelState::initialize(&template)
            .unwrap()
            .apply(&[arr2(&[[1.0f32, 1.0], [1.0, 1.0]]).into_dyn(), arr1(&[0.0f32, 0.0]).into_dyn()], 1.0)
            .unwrap()
    }

    #[test]
    fn test_checkpoint_restore_preserves_round_and_params() {
        let original = state();
        let json = checkpoint(&original).to_json().unwrap();
        let restored = restore(Checkpoint::from_json(&json).unwrap()).unwrap();
        assert_eq!(restored.round(), 1);
        assert_eq!(restored.parameters(), original.parameters());
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join(format!("fedavg_dp_ckpt_{}.json", std::process::id()));
        let ckpt = checkpoint(&state());
        ckpt.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, ckpt);
    }

    #[test]
    fn test_restore_rejects_empty() {
        let empty = Checkpoint {
            round: 3,
            parameters: vec![],
        };
        assert!(matches!(restore(empty), Err(FedError::Configuration(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Checkpoint::from_json("{\"round\": 1}"),
            Err(FedError::Checkpoint(_))
        ));
    }
}
