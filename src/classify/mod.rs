//! Container classification.
//!
//! A [`Classifier`] turns a container's metadata into a ranked list of technology labels.
//! Classification is pure: no I/O, and the same container always yields the same result.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::container::Container;

mod rules;

pub use rules::{Rule, RuleClassifier, RuleSet};

/// Label reported when nothing could be recognized.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Label of exporter containers started by this service.
pub const EXPORTER_LABEL: &str = "exporter";

/// Ranked `(label, score)` pairs, serialized as `{"result": [[label, score], ...]}`.
///
/// Scores lie in `[0, 1]`. Entries are ordered by descending score, ties by ascending label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    result: Vec<(String, f64)>,
}

impl Classification {
    /// Builds a classification, clamping scores into `[0, 1]` and establishing the ordering.
    pub fn new(entries: impl IntoIterator<Item = (String, f64)>) -> Self {
        let mut result: Vec<(String, f64)> = entries
            .into_iter()
            .map(|(label, score)| (label, score.clamp(0.0, 1.0)))
            .collect();
        result.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        if result.is_empty() {
            return Self::unknown();
        }
        Self { result }
    }

    pub fn unknown() -> Self {
        Self {
            result: vec![(UNKNOWN_LABEL.to_owned(), 0.0)],
        }
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.result
    }

    /// Returns the highest ranked label.
    pub fn top(&self) -> Option<&str> {
        self.result.first().map(|(label, _)| label.as_str())
    }

    pub fn is_unknown(&self) -> bool {
        self.top().is_none_or(|label| label == UNKNOWN_LABEL)
    }
}

/// Derives a [`Classification`] from container metadata.
///
/// Implementations must not fail: anything they cannot recognize is
/// [`Classification::unknown`].
pub trait Classifier: Send + Sync {
    fn classify(&self, container: &Container) -> Classification;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_and_ties() {
        let classification = Classification::new([
            ("redis".to_owned(), 0.6),
            ("mysql".to_owned(), 0.9),
            ("mariadb".to_owned(), 0.6),
        ]);
        let labels: Vec<_> = classification
            .entries()
            .iter()
            .map(|(label, _)| label.as_str())
            .collect();
        assert_eq!(labels, vec!["mysql", "mariadb", "redis"]);
        assert_eq!(classification.top(), Some("mysql"));
    }

    #[test]
    fn test_empty_is_unknown() {
        let classification = Classification::new([]);
        assert!(classification.is_unknown());
        assert_eq!(classification.entries(), &[("unknown".to_owned(), 0.0)]);
    }

    #[test]
    fn test_scores_are_clamped() {
        let classification = Classification::new([("nginx".to_owned(), 1.7)]);
        assert_eq!(classification.entries()[0].1, 1.0);
    }

    #[test]
    fn test_wire_shape() {
        let classification = Classification::new([("nginx".to_owned(), 0.6)]);
        assert_eq!(
            serde_json::to_value(&classification).unwrap(),
            serde_json::json!({"result": [["nginx", 0.6]]})
        );
    }
}
