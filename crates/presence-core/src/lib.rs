//! presence-core — Identification and attendance core for the kiosk.
//!
//! Nearest-neighbor matching of face embeddings against an enrolled set,
//! an append-only attendance log, and the detection state machine that
//! turns confident matches into deduplicated attendance events.

pub mod kiosk;
pub mod matcher;
pub mod provider;
pub mod recorder;
pub mod store;
pub mod types;

pub use kiosk::{CooldownTicket, DropReason, KioskMachine, KioskState, TriggerDecision, TriggerSource};
pub use matcher::{MatchError, MatchOutcome, Matcher, NearestNeighborMatcher, DEFAULT_DISTANCE_THRESHOLD};
pub use provider::{EmbeddingProvider, Frame, ProviderError};
pub use recorder::AttendanceRecorder;
pub use store::{EmbeddingStore, Snapshot, StoreError};
pub use types::{
    AttendanceEvent, AttendanceStatus, BoundingBox, DetectionSample, DimensionMismatch, Embedding,
    EnrolledIdentity, FaceObservation,
};
