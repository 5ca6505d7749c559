//! Nearest-neighbor identity matching.
//!
//! Compares a probe embedding against a snapshot of the enrolled set using
//! Euclidean distance and a fixed accept threshold. Pure: no side effects,
//! same inputs always produce the same outcome.

use crate::store::Snapshot;
use crate::types::{DetectionSample, DimensionMismatch};
use thiserror::Error;

/// Default accept threshold in normalized embedding space.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;

/// Outcome of resolving one detection request against the enrolled set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Best candidate was within the threshold.
    Matched { identity_id: String, distance: f32 },
    /// Best candidate was too far away.
    NoMatch { distance: f32 },
    /// More than one face was presented; no identity is ever picked.
    Ambiguous,
    /// The enrolled set is empty.
    Empty,
}

#[derive(Debug, Error)]
pub enum MatchError {
    /// The caller presented zero samples. Absence of a face is an
    /// input-layer error; the coordinator never invokes the matcher for it.
    #[error("no detection samples supplied")]
    NoSamples,
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
}

/// Strategy for resolving detection samples against an enrolled snapshot.
pub trait Matcher {
    fn resolve(
        &self,
        samples: &[DetectionSample],
        snapshot: &Snapshot,
    ) -> Result<MatchOutcome, MatchError>;
}

/// Euclidean nearest-neighbor matcher with a fixed accept threshold.
#[derive(Debug, Clone)]
pub struct NearestNeighborMatcher {
    threshold: f32,
}

impl NearestNeighborMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for NearestNeighborMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DISTANCE_THRESHOLD)
    }
}

impl Matcher for NearestNeighborMatcher {
    fn resolve(
        &self,
        samples: &[DetectionSample],
        snapshot: &Snapshot,
    ) -> Result<MatchOutcome, MatchError> {
        let sample = match samples {
            [] => return Err(MatchError::NoSamples),
            [single] => single,
            // Multiple descriptors for one frame: report ambiguity as-is,
            // never pick one arbitrarily.
            _ => return Ok(MatchOutcome::Ambiguous),
        };

        if snapshot.is_empty() {
            return Ok(MatchOutcome::Empty);
        }

        // Scan every candidate. Strict `<` keeps the earliest-inserted
        // candidate on equal minimal distances (stable tie-break).
        let mut best: Option<(&str, f32)> = None;
        for candidate in snapshot.iter() {
            let distance = sample.embedding.distance(&candidate.embedding)?;
            let better = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if better {
                best = Some((candidate.id.as_str(), distance));
            }
        }

        Ok(match best {
            Some((id, distance)) if distance <= self.threshold => MatchOutcome::Matched {
                identity_id: id.to_string(),
                distance,
            },
            Some((_, distance)) => MatchOutcome::NoMatch { distance },
            // Unreachable: the snapshot was checked non-empty above.
            None => MatchOutcome::Empty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EmbeddingStore;
    use crate::types::{Embedding, EnrolledIdentity};
    use chrono::Utc;

    fn sample(values: Vec<f32>) -> DetectionSample {
        DetectionSample {
            embedding: Embedding::new(values),
            captured_at: Utc::now(),
        }
    }

    fn snapshot_of(dim: usize, entries: &[(&str, Vec<f32>)]) -> Snapshot {
        let mut store = EmbeddingStore::new(dim);
        for (id, values) in entries {
            store
                .add(EnrolledIdentity {
                    id: id.to_string(),
                    display_name: id.to_string(),
                    embedding: Embedding::new(values.clone()),
                })
                .unwrap();
        }
        store.snapshot()
    }

    #[test]
    fn test_exact_match_distance_zero() {
        let snapshot = snapshot_of(2, &[("a", vec![0.3, 0.4]), ("b", vec![0.9, 0.1])]);
        let matcher = NearestNeighborMatcher::default();
        let outcome = matcher
            .resolve(&[sample(vec![0.3, 0.4])], &snapshot)
            .unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                identity_id: "a".to_string(),
                distance: 0.0
            }
        );
    }

    #[test]
    fn test_near_match_within_threshold() {
        let snapshot = snapshot_of(2, &[("a", vec![0.0, 0.0])]);
        let matcher = NearestNeighborMatcher::new(0.6);
        match matcher.resolve(&[sample(vec![0.01, 0.0])], &snapshot).unwrap() {
            MatchOutcome::Matched { identity_id, distance } => {
                assert_eq!(identity_id, "a");
                assert!((distance - 0.01).abs() < 1e-6);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_beyond_threshold_is_no_match() {
        let snapshot = snapshot_of(2, &[("a", vec![0.0, 0.0])]);
        let matcher = NearestNeighborMatcher::new(0.6);
        match matcher.resolve(&[sample(vec![0.8, 0.0])], &snapshot).unwrap() {
            MatchOutcome::NoMatch { distance } => assert!((distance - 0.8).abs() < 1e-6),
            other => panic!("expected no-match, got {other:?}"),
        }
    }

    #[test]
    fn test_exactly_at_threshold_matches() {
        let snapshot = snapshot_of(2, &[("a", vec![0.0, 0.0])]);
        let matcher = NearestNeighborMatcher::new(0.6);
        match matcher.resolve(&[sample(vec![0.6, 0.0])], &snapshot).unwrap() {
            MatchOutcome::Matched { identity_id, .. } => assert_eq!(identity_id, "a"),
            other => panic!("expected match at threshold, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_snapshot_always_empty() {
        let snapshot = snapshot_of(2, &[]);
        let matcher = NearestNeighborMatcher::default();
        assert_eq!(
            matcher.resolve(&[sample(vec![0.0, 0.0])], &snapshot).unwrap(),
            MatchOutcome::Empty
        );
    }

    #[test]
    fn test_multiple_samples_always_ambiguous() {
        // One of the two faces matches "a" perfectly; ambiguity still wins.
        let snapshot = snapshot_of(2, &[("a", vec![0.3, 0.4])]);
        let matcher = NearestNeighborMatcher::default();
        let samples = vec![sample(vec![0.3, 0.4]), sample(vec![9.0, 9.0])];
        assert_eq!(
            matcher.resolve(&samples, &snapshot).unwrap(),
            MatchOutcome::Ambiguous
        );
    }

    #[test]
    fn test_zero_samples_is_error() {
        let snapshot = snapshot_of(2, &[("a", vec![0.0, 0.0])]);
        let matcher = NearestNeighborMatcher::default();
        assert!(matches!(
            matcher.resolve(&[], &snapshot),
            Err(MatchError::NoSamples)
        ));
    }

    #[test]
    fn test_tie_break_earliest_insertion_wins() {
        // Both candidates sit at the same distance from the probe.
        let snapshot = snapshot_of(2, &[("late", vec![0.2, 0.0]), ("early", vec![-0.2, 0.0])]);
        // Insertion order is "late" then "early"; equal distance keeps "late".
        let matcher = NearestNeighborMatcher::default();
        for _ in 0..10 {
            match matcher.resolve(&[sample(vec![0.0, 0.0])], &snapshot).unwrap() {
                MatchOutcome::Matched { identity_id, .. } => assert_eq!(identity_id, "late"),
                other => panic!("expected match, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_nearest_of_many_selected() {
        let snapshot = snapshot_of(
            2,
            &[
                ("far", vec![5.0, 5.0]),
                ("near", vec![0.1, 0.0]),
                ("farther", vec![9.0, 9.0]),
            ],
        );
        let matcher = NearestNeighborMatcher::default();
        match matcher.resolve(&[sample(vec![0.0, 0.0])], &snapshot).unwrap() {
            MatchOutcome::Matched { identity_id, .. } => assert_eq!(identity_id, "near"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_dimension_mismatch_is_hard_error() {
        let snapshot = snapshot_of(2, &[("a", vec![0.0, 0.0])]);
        let matcher = NearestNeighborMatcher::default();
        assert!(matches!(
            matcher.resolve(&[sample(vec![0.0, 0.0, 0.0])], &snapshot),
            Err(MatchError::Dimension(_))
        ));
    }

    #[test]
    fn test_idempotent_for_fixed_snapshot() {
        let snapshot = snapshot_of(2, &[("a", vec![0.1, 0.2]), ("b", vec![0.7, 0.7])]);
        let matcher = NearestNeighborMatcher::default();
        let probe = [sample(vec![0.1, 0.25])];
        let first = matcher.resolve(&probe, &snapshot).unwrap();
        for _ in 0..5 {
            assert_eq!(matcher.resolve(&probe, &snapshot).unwrap(), first);
        }
    }
}
