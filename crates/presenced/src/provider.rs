//! Wire-descriptor embedding provider.
//!
//! The kiosk front-end runs the embedding model next to the camera and
//! ships the extracted face observations as the frame payload (a JSON
//! array). The daemon never touches pixels; this provider decodes the
//! payload and enforces the system-wide embedding dimension.

use presence_core::{EmbeddingProvider, FaceObservation, Frame, ProviderError};

/// Decodes client-extracted face observations from a frame payload.
pub struct DescriptorProvider {
    dim: usize,
    ready: bool,
}

impl DescriptorProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim, ready: false }
    }
}

impl EmbeddingProvider for DescriptorProvider {
    async fn warm_up(&mut self) -> Result<(), ProviderError> {
        if self.dim == 0 {
            return Err(ProviderError::ExtractionFailed(
                "embedding dimension must be nonzero".to_string(),
            ));
        }
        self.ready = true;
        tracing::info!(dim = self.dim, "descriptor provider ready");
        Ok(())
    }

    async fn extract(&self, frame: &Frame) -> Result<Vec<FaceObservation>, ProviderError> {
        if !self.ready {
            return Err(ProviderError::ModelNotReady);
        }
        let observations: Vec<FaceObservation> = serde_json::from_slice(&frame.data)
            .map_err(|e| ProviderError::ExtractionFailed(format!("bad frame payload: {e}")))?;
        for observation in &observations {
            if observation.embedding.dim() != self.dim {
                return Err(ProviderError::ExtractionFailed(format!(
                    "observation embedding has dimension {}, expected {}",
                    observation.embedding.dim(),
                    self.dim
                )));
            }
        }
        Ok(observations)
    }
}
