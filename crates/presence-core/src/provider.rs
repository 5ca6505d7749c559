//! Embedding provider seam.
//!
//! Frame capture and embedding extraction are external capabilities. The
//! coordinator only ever sees this trait: warm it up once at startup
//! (fail-fast, like model loading), then hand it frames and get face
//! observations back.

use crate::types::FaceObservation;
use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

/// One frame delivered by the external capture loop. The payload is opaque
/// to the core; only the provider knows how to interpret it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The extraction model is not initialized. Terminal for the session
    /// when it happens at startup; the operator retries.
    #[error("embedding model not ready")]
    ModelNotReady,
    #[error("embedding extraction failed: {0}")]
    ExtractionFailed(String),
}

/// External capability that turns frames into face observations.
///
/// A zero-length result means "no face in frame" and is not an error at
/// this layer; the coordinator decides what to do with it.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Initialize the provider. Called once before the first `extract`;
    /// failure maps to a terminal model-init error.
    fn warm_up(&mut self) -> impl Future<Output = Result<(), ProviderError>> + Send;

    /// Extract every face observation from one frame.
    fn extract(
        &self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Vec<FaceObservation>, ProviderError>> + Send;
}
