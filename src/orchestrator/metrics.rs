//! Per-round metric records and the append-only round history.

use serde::{Deserialize, Serialize};

/// Outcome of one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundMetrics {
    /// 1-based index of the round attempt within this orchestrator.
    ///
    /// Counts attempts, aborted ones included, and restarts at 1 for an
    /// orchestrator built with [`resume`](super::RoundOrchestrator::resume);
    /// use `model_round` for the global model version.
    pub round: usize,
    /// `ModelState.round` once the round finished (unchanged if aborted).
    pub model_round: u64,
    /// Clients whose update entered aggregation.
    pub accepted_clients: usize,
    /// Clients excluded (no examples, failed, or malformed update).
    pub excluded_clients: usize,
    /// Example-weighted mean local training loss of accepted clients.
    pub aggregate_loss: Option<f64>,
    /// Example-weighted mean local training accuracy of accepted clients.
    pub aggregate_accuracy: Option<f64>,
    /// Whether the state update was abandoned.
    pub aborted: bool,
    /// Why the round was aborted.
    pub failure: Option<String>,
}

/// Append-only log of round outcomes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoundHistory {
    entries: Vec<RoundMetrics>,
}

impl RoundHistory {
    /// Create a new, empty history.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a record.
    pub fn push(&mut self, entry: RoundMetrics) {
        self.entries.push(entry);
    }

    /// All records, oldest first.
    pub fn entries(&self) -> &[RoundMetrics] {
        &self.entries
    }

    /// Number of recorded rounds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of aborted rounds.
    pub fn aborted_rounds(&self) -> usize {
        self.entries.iter().filter(|e| e.aborted).count()
    }

    /// Serialize the history to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(round: usize, aborted: bool) -> RoundMetrics {
        RoundMetrics {
            round,
            model_round: round as u64,
            accepted_clients: 3,
            excluded_clients: 1,
            aggregate_loss: Some(0.5),
            aggregate_accuracy: Some(0.8),
            aborted,
            failure: aborted.then(|| "no clients".to_string()),
        }
    }

    #[test]
    fn test_history_push_and_len() {
        let mut history = RoundHistory::new();
        assert!(history.is_empty());
        history.push(entry(1, false));
        history.push(entry(2, true));
        assert_eq!(history.len(), 2);
        assert_eq!(history.aborted_rounds(), 1);
        assert_eq!(history.entries()[1].round, 2);
    }

    #[test]
    fn test_metrics_serde() {
        let json = serde_json::to_string(&entry(4, true)).unwrap();
        let restored: RoundMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, entry(4, true));
    }

    #[test]
    fn test_history_json() {
        let mut history = RoundHistory::new();
        history.push(entry(1, false));
        assert!(history.to_json().unwrap().contains("\"accepted_clients\": 3"));
    }
}
