//! Detection coordinator.
//!
//! Hosts the kiosk state machine, the embedding store, and the attendance
//! recorder on one dedicated task. All access goes through a request
//! channel, so store and recorder mutations are serialized and the state
//! machine is the only concurrency gate a detection ever needs.
//!
//! A detection runs as a spawned task against a point-in-time store
//! snapshot; the loop keeps serving queries while it is outstanding, and
//! its result comes back as an internal request. If the machine stopped
//! expecting that detection by then (session teardown), the result is
//! discarded without a recorder write.

use crate::config::Config;
use chrono::{DateTime, Utc};
use presence_core::{
    AttendanceEvent, AttendanceRecorder, AttendanceStatus, CooldownTicket, DetectionSample,
    Embedding, EmbeddingProvider, EmbeddingStore, EnrolledIdentity, Frame, KioskMachine,
    KioskState, MatchError, MatchOutcome, Matcher, NearestNeighborMatcher, ProviderError,
    Snapshot, StoreError, TriggerDecision, TriggerSource,
};
use presence_store::{SqliteRepository, StorageError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("coordinator task exited")]
    ChannelClosed,
}

/// Startup failure. Terminal for the session; the operator retries.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("model init failure: {0}")]
    ModelInit(#[source] ProviderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a detection cycle ended in the error state.
#[derive(Debug, Error)]
pub enum DetectionFailure {
    #[error("no face detected")]
    NoFace,
    #[error("multiple faces detected; ensure only one person is in view")]
    MultipleFaces,
    #[error("no identities enrolled")]
    NoEnrolledIdentities,
    #[error("face not recognized")]
    NotRecognized,
    #[error("detection timed out")]
    TimedOut,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Result of one detection task, fed back into the request loop.
enum DetectionResolution {
    Matched {
        identity_id: String,
        display_name: String,
        distance: f32,
    },
    Failed(DetectionFailure),
}

/// Outcome of a detection trigger, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct DetectReport {
    /// False when the trigger was dropped or the result discarded.
    pub accepted: bool,
    pub state: KioskState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl DetectReport {
    fn plain(accepted: bool, state: KioskState, message: impl Into<String>) -> Self {
        Self {
            accepted,
            state,
            message: message.into(),
            identity_id: None,
            display_name: None,
            distance: None,
            event_id: None,
        }
    }
}

/// Daemon status snapshot for the wire surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: KioskState,
    pub cooldown_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_identity: Option<String>,
    pub auto_detection: bool,
    pub enrolled: usize,
    pub events: usize,
    pub embedding_dim: usize,
    pub distance_threshold: f32,
}

/// Messages sent from the wire surface (and internal timers) to the
/// coordinator task.
enum Request {
    Enroll {
        id: Option<String>,
        display_name: String,
        embedding: Embedding,
        reply: oneshot::Sender<Result<EnrolledIdentity, CoordinatorError>>,
    },
    UpdateEmbedding {
        id: String,
        embedding: Embedding,
        reply: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Rename {
        id: String,
        display_name: String,
        reply: oneshot::Sender<Result<EnrolledIdentity, CoordinatorError>>,
    },
    RemoveIdentity {
        id: String,
        reply: oneshot::Sender<Result<EnrolledIdentity, CoordinatorError>>,
    },
    ListIdentities {
        reply: oneshot::Sender<Vec<EnrolledIdentity>>,
    },
    RecordAttendance {
        identity_id: String,
        reply: oneshot::Sender<Result<AttendanceEvent, CoordinatorError>>,
    },
    ListAttendance {
        reply: oneshot::Sender<Vec<AttendanceEvent>>,
    },
    AttendanceForIdentity {
        identity_id: String,
        reply: oneshot::Sender<Vec<AttendanceEvent>>,
    },
    AttendanceBetween {
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        reply: oneshot::Sender<Vec<AttendanceEvent>>,
    },
    Detect {
        frame: Frame,
        source: TriggerSource,
        reply: oneshot::Sender<DetectReport>,
    },
    DetectionResolved {
        resolution: DetectionResolution,
        reply: oneshot::Sender<DetectReport>,
    },
    SetAutoDetection {
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    CooldownElapsed {
        ticket: CooldownTicket,
    },
}

/// Clone-safe handle to the coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Request>,
}

macro_rules! request {
    ($self:ident, $variant:ident { $($field:ident),* }) => {{
        let (reply_tx, reply_rx) = oneshot::channel();
        $self
            .tx
            .send(Request::$variant { $($field,)* reply: reply_tx })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }};
}

impl CoordinatorHandle {
    pub async fn enroll(
        &self,
        id: Option<String>,
        display_name: String,
        embedding: Embedding,
    ) -> Result<EnrolledIdentity, CoordinatorError> {
        request!(self, Enroll { id, display_name, embedding })?
    }

    pub async fn update_embedding(
        &self,
        id: String,
        embedding: Embedding,
    ) -> Result<(), CoordinatorError> {
        request!(self, UpdateEmbedding { id, embedding })?
    }

    pub async fn rename(
        &self,
        id: String,
        display_name: String,
    ) -> Result<EnrolledIdentity, CoordinatorError> {
        request!(self, Rename { id, display_name })?
    }

    pub async fn remove_identity(&self, id: String) -> Result<EnrolledIdentity, CoordinatorError> {
        request!(self, RemoveIdentity { id })?
    }

    /// All enrolled identities, ordered by display name.
    pub async fn list_identities(&self) -> Result<Vec<EnrolledIdentity>, CoordinatorError> {
        request!(self, ListIdentities {})
    }

    /// Administrative attendance write for an enrolled identity.
    pub async fn record_attendance(
        &self,
        identity_id: String,
    ) -> Result<AttendanceEvent, CoordinatorError> {
        request!(self, RecordAttendance { identity_id })?
    }

    /// All attendance events, most recent first.
    pub async fn list_attendance(&self) -> Result<Vec<AttendanceEvent>, CoordinatorError> {
        request!(self, ListAttendance {})
    }

    pub async fn attendance_for_identity(
        &self,
        identity_id: String,
    ) -> Result<Vec<AttendanceEvent>, CoordinatorError> {
        request!(self, AttendanceForIdentity { identity_id })
    }

    /// Events within the inclusive bounds, most recent first.
    pub async fn attendance_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AttendanceEvent>, CoordinatorError> {
        request!(self, AttendanceBetween { from, to })
    }

    /// Offer one frame for detection.
    pub async fn detect(
        &self,
        frame: Frame,
        source: TriggerSource,
    ) -> Result<DetectReport, CoordinatorError> {
        request!(self, Detect { frame, source })
    }

    pub async fn set_auto_detection(&self, enabled: bool) -> Result<bool, CoordinatorError> {
        request!(self, SetAutoDetection { enabled })
    }

    pub async fn status(&self) -> Result<StatusReport, CoordinatorError> {
        request!(self, Status {})
    }
}

/// Spawn the coordinator task.
///
/// Loads both collections from the repository and warms up the provider
/// synchronously, so startup fails fast if storage is unreadable or the
/// model cannot initialize.
pub async fn spawn_coordinator<P: EmbeddingProvider>(
    config: &Config,
    mut provider: P,
    repository: SqliteRepository,
) -> Result<CoordinatorHandle, SpawnError> {
    let identities = repository.load_identities().await?;
    let events = repository.load_events().await?;
    let store = EmbeddingStore::from_entries(config.embedding_dim, identities)?;
    let recorder = AttendanceRecorder::from_events(events);
    tracing::info!(
        enrolled = store.len(),
        events = recorder.len(),
        "collections loaded"
    );

    provider.warm_up().await.map_err(SpawnError::ModelInit)?;

    let mut machine = KioskMachine::new();
    machine.provider_ready();

    let (tx, rx) = mpsc::channel::<Request>(16);
    let coordinator = Coordinator {
        store,
        recorder,
        machine,
        matcher: NearestNeighborMatcher::new(config.distance_threshold),
        provider: Arc::new(provider),
        repository,
        cooldown: Duration::from_millis(config.cooldown_ms),
        detect_timeout: Duration::from_secs(config.detect_timeout_secs),
        tx: tx.downgrade(),
    };
    tokio::spawn(coordinator.run(rx));
    Ok(CoordinatorHandle { tx })
}

struct Coordinator<P> {
    store: EmbeddingStore,
    recorder: AttendanceRecorder,
    machine: KioskMachine,
    matcher: NearestNeighborMatcher,
    provider: Arc<P>,
    repository: SqliteRepository,
    cooldown: Duration,
    detect_timeout: Duration,
    /// Weak sender for internal events (timers, detection results): timer
    /// tasks must not keep the loop alive after every handle is dropped.
    tx: mpsc::WeakSender<Request>,
}

impl<P: EmbeddingProvider> Coordinator<P> {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        tracing::info!("coordinator started");
        while let Some(request) = rx.recv().await {
            self.handle(request).await;
        }
        // Session teardown: pending detections and cooldown timers hold
        // only weak senders, so their eventual results are discarded.
        self.flush_identities_logged().await;
        self.flush_events_logged().await;
        tracing::info!("coordinator exiting");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Enroll {
                id,
                display_name,
                embedding,
                reply,
            } => {
                let identity = EnrolledIdentity {
                    id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    display_name,
                    embedding,
                };
                let result = match self.store.add(identity.clone()) {
                    Ok(()) => self.flush_identities().await.map(|()| identity),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Request::UpdateEmbedding { id, embedding, reply } => {
                let result = match self.store.update_embedding(&id, embedding) {
                    Ok(()) => self.flush_identities().await,
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Request::Rename {
                id,
                display_name,
                reply,
            } => {
                let result = match self.store.update_display_name(&id, display_name) {
                    Ok(()) => {
                        let updated = self.store.get(&id).cloned();
                        match updated {
                            Some(identity) => {
                                self.flush_identities().await.map(|()| identity)
                            }
                            None => Err(StoreError::IdentityNotFound(id).into()),
                        }
                    }
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Request::RemoveIdentity { id, reply } => {
                let result = match self.store.remove(&id) {
                    Ok(removed) => self.flush_identities().await.map(|()| removed),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            Request::ListIdentities { reply } => {
                let mut list = self.store.entries().to_vec();
                list.sort_by(|a, b| a.display_name.cmp(&b.display_name));
                let _ = reply.send(list);
            }
            Request::RecordAttendance { identity_id, reply } => {
                let display_name = match self.store.get(&identity_id) {
                    Some(identity) => identity.display_name.clone(),
                    None => {
                        let _ = reply
                            .send(Err(StoreError::IdentityNotFound(identity_id).into()));
                        return;
                    }
                };
                let event =
                    self.recorder
                        .record(&identity_id, &display_name, AttendanceStatus::Present);
                let result = self.flush_events().await.map(|()| event);
                let _ = reply.send(result);
            }
            Request::ListAttendance { reply } => {
                let _ = reply.send(self.recorder.all().to_vec());
            }
            Request::AttendanceForIdentity { identity_id, reply } => {
                let _ = reply.send(self.recorder.query_by_identity(&identity_id));
            }
            Request::AttendanceBetween { from, to, reply } => {
                let mut events = self.recorder.query_by_range(from, to);
                events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
                let _ = reply.send(events);
            }
            Request::Detect {
                frame,
                source,
                reply,
            } => self.handle_detect(frame, source, reply),
            Request::DetectionResolved { resolution, reply } => {
                let report = self.finish_detection(resolution).await;
                let _ = reply.send(report);
            }
            Request::SetAutoDetection { enabled, reply } => {
                self.machine.set_auto_detection(enabled);
                tracing::info!(enabled, "auto detection toggled");
                let _ = reply.send(self.machine.auto_detection());
            }
            Request::Status { reply } => {
                let _ = reply.send(StatusReport {
                    state: self.machine.state(),
                    cooldown_active: self.machine.cooldown_active(),
                    cooldown_identity: self.machine.cooldown_identity().map(String::from),
                    auto_detection: self.machine.auto_detection(),
                    enrolled: self.store.len(),
                    events: self.recorder.len(),
                    embedding_dim: self.store.dim(),
                    distance_threshold: self.matcher.threshold(),
                });
            }
            Request::CooldownElapsed { ticket } => {
                self.machine.cooldown_elapsed(ticket);
            }
        }
    }

    /// Gate the trigger through the state machine; on acceptance, run the
    /// detection as a spawned task against a store snapshot so the loop
    /// stays responsive while the call is outstanding.
    fn handle_detect(
        &mut self,
        frame: Frame,
        source: TriggerSource,
        reply: oneshot::Sender<DetectReport>,
    ) {
        match self.machine.try_begin(source) {
            TriggerDecision::Dropped(reason) => {
                tracing::debug!(?reason, ?source, "detection trigger dropped");
                let _ = reply.send(DetectReport::plain(
                    false,
                    self.machine.state(),
                    reason.message(),
                ));
            }
            TriggerDecision::Accepted => {
                let provider = Arc::clone(&self.provider);
                let matcher = self.matcher.clone();
                let snapshot = self.store.snapshot();
                let detect_timeout = self.detect_timeout;
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let resolution =
                        resolve_frame(provider.as_ref(), &matcher, &snapshot, frame, detect_timeout)
                            .await;
                    let Some(tx) = tx.upgrade() else {
                        return;
                    };
                    let _ = tx.send(Request::DetectionResolved { resolution, reply }).await;
                });
            }
        }
    }

    /// Apply a detection result to the machine. The single recorder write
    /// happens here, on the `Detecting → Success` transition only.
    async fn finish_detection(&mut self, resolution: DetectionResolution) -> DetectReport {
        match resolution {
            DetectionResolution::Matched {
                identity_id,
                display_name,
                distance,
            } => match self.machine.finish_matched(&identity_id) {
                Some(ticket) => {
                    let event = self.recorder.record(
                        &identity_id,
                        &display_name,
                        AttendanceStatus::Present,
                    );
                    // The in-memory log is authoritative; a failed flush is
                    // retried on the next one.
                    self.flush_events_logged().await;
                    self.arm_reset_timer(ticket);
                    DetectReport {
                        accepted: true,
                        state: self.machine.state(),
                        message: format!("attendance marked for {display_name}"),
                        identity_id: Some(identity_id),
                        display_name: Some(display_name),
                        distance: Some(distance),
                        event_id: Some(event.id),
                    }
                }
                None => self.abandoned_report(),
            },
            DetectionResolution::Failed(failure) => {
                tracing::warn!(error = %failure, "detection failed");
                match self.machine.finish_failed() {
                    Some(ticket) => {
                        self.arm_reset_timer(ticket);
                        DetectReport::plain(true, self.machine.state(), failure.to_string())
                    }
                    None => self.abandoned_report(),
                }
            }
        }
    }

    fn abandoned_report(&self) -> DetectReport {
        tracing::debug!("detection result discarded, machine no longer expecting it");
        DetectReport::plain(false, self.machine.state(), "detection abandoned")
    }

    /// Arm the reset timer for a `Success`/`Error` state. The ticket makes
    /// the timer single-shot: if the machine moved on (manual override,
    /// teardown), the expiry is ignored.
    fn arm_reset_timer(&self, ticket: CooldownTicket) {
        let tx = self.tx.clone();
        let cooldown = self.cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let Some(tx) = tx.upgrade() else {
                return;
            };
            let _ = tx.send(Request::CooldownElapsed { ticket }).await;
        });
    }

    async fn flush_identities(&self) -> Result<(), CoordinatorError> {
        self.repository
            .save_identities(self.store.entries())
            .await
            .map_err(Into::into)
    }

    async fn flush_events(&self) -> Result<(), CoordinatorError> {
        self.repository
            .save_events(self.recorder.all())
            .await
            .map_err(Into::into)
    }

    async fn flush_identities_logged(&self) {
        if let Err(e) = self.flush_identities().await {
            tracing::error!(error = %e, "identity flush failed");
        }
    }

    async fn flush_events_logged(&self) {
        if let Err(e) = self.flush_events().await {
            tracing::error!(error = %e, "attendance flush failed");
        }
    }
}

/// Run one detection against a point-in-time snapshot. Pure apart from the
/// provider call; the bounded timeout is the recommended hardening around
/// an otherwise unbounded extraction.
async fn resolve_frame<P: EmbeddingProvider>(
    provider: &P,
    matcher: &NearestNeighborMatcher,
    snapshot: &Snapshot,
    frame: Frame,
    detect_timeout: Duration,
) -> DetectionResolution {
    let extraction = tokio::time::timeout(detect_timeout, provider.extract(&frame)).await;
    let observations = match extraction {
        Err(_) => return DetectionResolution::Failed(DetectionFailure::TimedOut),
        Ok(Err(e)) => return DetectionResolution::Failed(e.into()),
        Ok(Ok(observations)) => observations,
    };

    // Zero faces is an input-layer error; the matcher is never consulted.
    if observations.is_empty() {
        return DetectionResolution::Failed(DetectionFailure::NoFace);
    }

    let samples: Vec<DetectionSample> = observations
        .into_iter()
        .map(|o| DetectionSample {
            embedding: o.embedding,
            captured_at: frame.captured_at,
        })
        .collect();

    match matcher.resolve(&samples, snapshot) {
        Err(e) => DetectionResolution::Failed(e.into()),
        Ok(MatchOutcome::Ambiguous) => {
            DetectionResolution::Failed(DetectionFailure::MultipleFaces)
        }
        Ok(MatchOutcome::Empty) => {
            DetectionResolution::Failed(DetectionFailure::NoEnrolledIdentities)
        }
        Ok(MatchOutcome::NoMatch { distance }) => {
            tracing::debug!(distance, "best candidate beyond threshold");
            DetectionResolution::Failed(DetectionFailure::NotRecognized)
        }
        Ok(MatchOutcome::Matched {
            identity_id,
            distance,
        }) => {
            let display_name = snapshot
                .find(&identity_id)
                .map(|i| i.display_name.clone())
                .unwrap_or_else(|| identity_id.clone());
            tracing::info!(identity = %identity_id, distance, "face matched");
            DetectionResolution::Matched {
                identity_id,
                display_name,
                distance,
            }
        }
    }
}
