use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, in source-frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Two embeddings (or an embedding and a store) disagree on vector length.
///
/// The embedding dimension is fixed for the whole system; a mismatch is
/// always a hard error, never a silent truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("embedding dimension mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Face embedding vector (128-dimensional in the default configuration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute the Euclidean (L2) distance to another embedding.
    pub fn distance(&self, other: &Embedding) -> Result<f32, DimensionMismatch> {
        if self.values.len() != other.values.len() {
            return Err(DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            });
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Ok(sum.sqrt())
    }
}

/// An enrolled person: stable id, display name, reference embedding.
///
/// Owned exclusively by the embedding store. The embedding is replaced on
/// re-enrollment and the whole record destroyed on removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub id: String,
    pub display_name: String,
    pub embedding: Embedding,
}

/// One face observation reported by the embedding provider for a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
}

/// A transient probe embedding, consumed once by the matcher.
#[derive(Debug, Clone)]
pub struct DetectionSample {
    pub embedding: Embedding,
    pub captured_at: DateTime<Utc>,
}

/// Attendance status recorded with each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// One attendance event. Created only by the recorder, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: String,
    pub identity_id: String,
    pub display_name: String,
    pub occurred_at: DateTime<Utc>,
    pub status: AttendanceStatus,
}
