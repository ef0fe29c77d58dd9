//! Error types for federated training

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FedError>;

/// All possible errors raised by federated training.
#[derive(Error, Debug)]
pub enum FedError {
    /// Bad model template or invalid hyperparameters (fatal, raised before any round)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid differential-privacy parameters (fatal at mechanism construction)
    #[error("Privacy configuration error: {0}")]
    PrivacyConfig(String),

    /// A client holds no examples and is excluded from the round
    #[error("Client {client_id} has no local examples")]
    EmptyClient {
        /// Identifier of the excluded client
        client_id: String,
    },

    /// No client contributed to a round
    #[error("Aggregation failed: {0}")]
    Aggregation(String),

    /// A non-finite value appeared in an aggregated delta or new parameters
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Tensor sequences disagree in count or shape
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Training was stopped through the cancellation token
    #[error("Training cancelled")]
    Cancelled,

    /// Persisting or loading a checkpoint failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

impl From<ndarray::ShapeError> for FedError {
    fn from(e: ndarray::ShapeError) -> Self {
        FedError::DimensionMismatch(e.to_string())
    }
}

impl From<serde_json::Error> for FedError {
    fn from(e: serde_json::Error) -> Self {
        FedError::Checkpoint(e.to_string())
    }
}

impl From<std::io::Error> for FedError {
    fn from(e: std::io::Error) -> Self {
        FedError::Checkpoint(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error_converts() {
        let err = ndarray::Array1::<f32>::zeros(3)
            .into_shape((2, 2))
            .map_err(FedError::from)
            .unwrap_err();
        assert!(matches!(err, FedError::DimensionMismatch(_)));
    }

    #[test]
    fn test_display_includes_client() {
        let e = FedError::EmptyClient {
            client_id: "client_7".into(),
        };
        assert!(e.to_string().contains("client_7"));
    }
}
