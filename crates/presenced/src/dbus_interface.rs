//! D-Bus interface for the Presence kiosk daemon.
//!
//! Bus name: org.freedesktop.Presence1
//! Object path: /org/freedesktop/Presence1
//!
//! Structured payloads (identities, events, reports) travel as JSON
//! strings; embeddings and frame payloads arrive the same way.

use crate::coordinator::CoordinatorHandle;
use chrono::{DateTime, Utc};
use presence_core::{Embedding, Frame, TriggerSource};
use serde::Serialize;
use zbus::interface;

pub struct PresenceService {
    coordinator: CoordinatorHandle,
}

impl PresenceService {
    pub fn new(coordinator: CoordinatorHandle) -> Self {
        Self { coordinator }
    }
}

fn failed(err: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn invalid(err: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::InvalidArgs(err.to_string())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

fn parse_embedding(json: &str) -> zbus::fdo::Result<Embedding> {
    let values: Vec<f32> = serde_json::from_str(json)
        .map_err(|e| invalid(format!("bad embedding payload: {e}")))?;
    Ok(Embedding::new(values))
}

/// Parse an RFC 3339 bound; the empty string means unbounded.
fn parse_bound(value: &str) -> zbus::fdo::Result<Option<DateTime<Utc>>> {
    if value.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| invalid(format!("bad timestamp {value:?}: {e}")))
}

#[interface(name = "org.freedesktop.Presence1")]
impl PresenceService {
    /// Enroll an identity. An empty id asks the daemon to generate one.
    /// Returns the created identity as JSON.
    async fn enroll(
        &self,
        id: &str,
        display_name: &str,
        embedding_json: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(id, display_name, "enroll requested");
        let embedding = parse_embedding(embedding_json)?;
        let id = (!id.is_empty()).then(|| id.to_string());
        let identity = self
            .coordinator
            .enroll(id, display_name.to_string(), embedding)
            .await
            .map_err(failed)?;
        to_json(&identity)
    }

    /// Replace the embedding of an enrolled identity (re-enrollment).
    async fn update_embedding(&self, id: &str, embedding_json: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "re-enrollment requested");
        let embedding = parse_embedding(embedding_json)?;
        self.coordinator
            .update_embedding(id.to_string(), embedding)
            .await
            .map_err(failed)?;
        Ok(true)
    }

    /// Change an identity's display name. Returns the updated identity.
    async fn rename(&self, id: &str, display_name: &str) -> zbus::fdo::Result<String> {
        let identity = self
            .coordinator
            .rename(id.to_string(), display_name.to_string())
            .await
            .map_err(failed)?;
        to_json(&identity)
    }

    /// Remove an enrolled identity.
    async fn remove_identity(&self, id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(id, "removal requested");
        self.coordinator
            .remove_identity(id.to_string())
            .await
            .map_err(failed)?;
        Ok(true)
    }

    /// All enrolled identities ordered by display name, as JSON.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.coordinator.list_identities().await.map_err(failed)?;
        to_json(&identities)
    }

    /// Administrative attendance write. Returns the created event as JSON.
    async fn record_attendance(&self, identity_id: &str) -> zbus::fdo::Result<String> {
        tracing::info!(identity_id, "manual attendance record requested");
        let event = self
            .coordinator
            .record_attendance(identity_id.to_string())
            .await
            .map_err(failed)?;
        to_json(&event)
    }

    /// All attendance events, most recent first, as JSON.
    async fn list_attendance(&self) -> zbus::fdo::Result<String> {
        let events = self.coordinator.list_attendance().await.map_err(failed)?;
        to_json(&events)
    }

    /// Attendance events for one identity, as JSON.
    async fn attendance_for_identity(&self, identity_id: &str) -> zbus::fdo::Result<String> {
        let events = self
            .coordinator
            .attendance_for_identity(identity_id.to_string())
            .await
            .map_err(failed)?;
        to_json(&events)
    }

    /// Attendance events within the inclusive RFC 3339 bounds (empty string
    /// = unbounded), most recent first, as JSON.
    async fn attendance_between(&self, from: &str, to: &str) -> zbus::fdo::Result<String> {
        let from = parse_bound(from)?;
        let to = parse_bound(to)?;
        let events = self
            .coordinator
            .attendance_between(from, to)
            .await
            .map_err(failed)?;
        to_json(&events)
    }

    /// Offer one frame for detection. The payload is the face-observation
    /// JSON produced by the front-end extractor; `manual` marks an
    /// operator-initiated capture. Returns the detection report as JSON.
    async fn detect(
        &self,
        frame_json: &str,
        width: u32,
        height: u32,
        manual: bool,
    ) -> zbus::fdo::Result<String> {
        let source = if manual {
            TriggerSource::Manual
        } else {
            TriggerSource::Automatic
        };
        let frame = Frame {
            data: frame_json.as_bytes().to_vec(),
            width,
            height,
            captured_at: Utc::now(),
        };
        let report = self
            .coordinator
            .detect(frame, source)
            .await
            .map_err(failed)?;
        to_json(&report)
    }

    /// Toggle automatic (per-frame) detection. Manual capture is unaffected.
    async fn set_auto_detection(&self, enabled: bool) -> zbus::fdo::Result<bool> {
        self.coordinator
            .set_auto_detection(enabled)
            .await
            .map_err(failed)
    }

    /// Daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.coordinator.status().await.map_err(failed)?;
        to_json(&status)
    }
}
