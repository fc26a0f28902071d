// SPDX-License-Identifier: MIT
//! Recording session lifecycle.
//!
//! One `RecordingSession` per target, held in a registry keyed by target id.
//! The session is an explicit state machine (Idle → Active → Finalizing →
//! Completed | Failed) delegating the backend-specific work to a
//! [`RecordingStrategy`] chosen exactly once, at start. Strategy failures
//! always land the session in Failed — a target is never left stuck Active —
//! and a terminal session frees its target for the next start immediately.

pub mod backend;
pub mod context;
pub mod error;
pub mod finalize;
pub mod frames;
pub mod payload;
pub mod proprietary;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::artifacts::{ArtifactRecord, ArtifactStore};
use crate::browser::{TargetHandle, TargetRegistry};
use crate::config::RecordingConfig;
use crate::control::{CapturedFrame, ControlChannel, FrameFormat, FrameSubscription};
use crate::ipc::event::EventBroadcaster;

pub use backend::RecordingBackend;
pub use error::RecordError;

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Active,
    Finalizing,
    Completed,
    Failed,
}

impl SessionState {
    /// Live sessions hold their target; terminal and idle ones don't.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Finalizing)
    }
}

/// The per-target recording session. Owned exclusively by the registry; all
/// access goes through the slot mutex, so transitions are strictly sequential
/// per target while independent targets proceed concurrently.
pub struct RecordingSession {
    pub target_id: String,
    pub backend: RecordingBackend,
    /// Logical artifact name the caller asked for (or we generated).
    pub name: String,
    /// Session-scoped directory artifacts are written into.
    pub dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
    /// Backend handle; strategy-owned, detached exactly once per exit path.
    channel: Option<Arc<dyn ControlChannel>>,
    /// Frame queue (frame capture only). Acks happen upstream, in the channel.
    frames: Option<mpsc::UnboundedReceiver<CapturedFrame>>,
    sub: FrameSubscription,
}

/// Caller options for `recording.start`, already validated by the handler.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub use_frame_capture: bool,
    pub format: Option<FrameFormat>,
    pub quality: Option<u8>,
}

/// What a successful start looks like to the handler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub target_id: String,
    pub backend: String,
    pub name: String,
}

/// What a successful stop looks like to the handler.
#[derive(Debug, Clone)]
pub struct StopReport {
    pub record: ArtifactRecord,
    pub frame_count: Option<usize>,
    pub confirmed_stable: bool,
}

/// Live status of a target's session, if one exists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub target_id: String,
    pub state: SessionState,
    pub backend: String,
    pub name: String,
    pub elapsed_seconds: i64,
}

// ─── Strategy seam ───────────────────────────────────────────────────────────

/// Everything a strategy needs to finalize a session, extracted from the slot
/// so the stop call can run without holding the slot lock.
pub struct StopContext {
    pub target_id: String,
    pub name: String,
    pub dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub channel: Option<Arc<dyn ControlChannel>>,
    pub frames: Option<mpsc::UnboundedReceiver<CapturedFrame>>,
    pub sub: FrameSubscription,
    pub max_wait: Duration,
}

pub struct StopOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub is_dir: bool,
    pub frame_count: Option<usize>,
    /// False when the finalization monitor ran out of budget and the result is
    /// best-effort.
    pub confirmed_stable: bool,
}

/// One implementation per backend kind; selected once per session.
#[async_trait]
pub trait RecordingStrategy: Send + Sync {
    /// Acquire backend resources and store the handle in the session. On
    /// failure the strategy must release anything it acquired.
    async fn start(
        &self,
        target: &dyn TargetHandle,
        session: &mut RecordingSession,
    ) -> Result<(), RecordError>;

    /// Produce the finalized artifact. Must release the backend handle on
    /// every exit path, success or failure.
    async fn stop(
        &self,
        target: &dyn TargetHandle,
        cx: &mut StopContext,
    ) -> Result<StopOutcome, RecordError>;
}

// ─── Recorder ────────────────────────────────────────────────────────────────

pub struct Recorder {
    settings: RecordingConfig,
    targets: Arc<TargetRegistry>,
    artifacts: Arc<ArtifactStore>,
    broadcaster: Arc<EventBroadcaster>,
    sessions: RwLock<HashMap<String, Arc<Mutex<RecordingSession>>>>,
}

impl Recorder {
    pub fn new(
        settings: RecordingConfig,
        targets: Arc<TargetRegistry>,
        artifacts: Arc<ArtifactStore>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            settings,
            targets,
            artifacts,
            broadcaster,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Begin recording the target. Legal only when no live session exists for
    /// it; fails `AlreadyActive` (with no side effects) otherwise.
    pub async fn start(
        &self,
        target_id: Option<&str>,
        opts: StartOptions,
    ) -> Result<StartReport, RecordError> {
        let target = self.targets.resolve(target_id).await?;
        let tid = target.target_id().to_string();
        let slot = self.slot(&tid).await;
        let mut session = slot.lock().await;

        if session.state.is_live() {
            return Err(RecordError::AlreadyActive { target_id: tid });
        }

        // Selection happens once, here; the backend is immutable afterwards.
        let backend = backend::select(target.descriptor(), opts.use_frame_capture)?;

        let sub = self.settings.frame_subscription(
            opts.width,
            opts.height,
            opts.format,
            opts.quality,
        );
        session.backend = backend;
        session.name = artifact_name(opts.name.as_deref(), backend, sub.format);
        session.dir = self.session_dir(&tid);
        session.started_at = Utc::now();
        session.sub = sub;
        session.channel = None;
        session.frames = None;

        let strategy = self.strategy_for(backend);
        if let Err(e) = strategy.start(target.as_ref(), &mut session).await {
            // The strategy releases its own handle on failure; this is the
            // backstop for the detach-exactly-once invariant.
            if let Some(channel) = session.channel.take() {
                if let Err(detach_err) = channel.detach().await {
                    warn!(err = %detach_err, "backstop detach failed");
                }
            }
            session.state = SessionState::Failed;
            self.notify(&session);
            return Err(e);
        }

        session.state = SessionState::Active;
        info!(target_id = %session.target_id, backend = %backend, name = %session.name, "recording started");
        self.notify(&session);
        Ok(StartReport {
            target_id: session.target_id.clone(),
            backend: backend.to_string(),
            name: session.name.clone(),
        })
    }

    /// Stop recording the target, finalize, and publish the artifact. Legal
    /// only from Active.
    pub async fn stop(
        &self,
        target_id: Option<&str>,
        max_wait: Duration,
    ) -> Result<StopReport, RecordError> {
        let target = self.targets.resolve(target_id).await?;
        let tid = target.target_id().to_string();
        let slot = {
            self.sessions
                .read()
                .await
                .get(&tid)
                .cloned()
                .ok_or_else(|| RecordError::NotActive {
                    target_id: tid.clone(),
                })?
        };

        // Move to Finalizing under the lock, then run the (possibly long)
        // strategy stop without it — a concurrent start must observe
        // AlreadyActive instead of queueing behind the flush.
        let (strategy, mut cx) = {
            let mut session = slot.lock().await;
            if session.state != SessionState::Active {
                return Err(RecordError::NotActive { target_id: tid });
            }
            session.state = SessionState::Finalizing;
            self.notify(&session);
            (
                self.strategy_for(session.backend),
                StopContext {
                    target_id: session.target_id.clone(),
                    name: session.name.clone(),
                    dir: session.dir.clone(),
                    started_at: session.started_at,
                    channel: session.channel.take(),
                    frames: session.frames.take(),
                    sub: session.sub,
                    max_wait,
                },
            )
        };

        let result = strategy.stop(target.as_ref(), &mut cx).await;

        // Backstop: whatever happened, the handle must not survive the stop.
        if let Some(channel) = cx.channel.take() {
            warn!(target_id = %tid, "strategy left the control channel attached — detaching");
            if let Err(e) = channel.detach().await {
                warn!(err = %e, "backstop detach failed");
            }
        }

        let mut session = slot.lock().await;
        match result {
            Ok(outcome) => {
                let record = ArtifactRecord {
                    name: session.name.clone(),
                    path: outcome.path,
                    size_bytes: outcome.size_bytes,
                    finalized_at: Utc::now(),
                    is_dir: outcome.is_dir,
                };
                self.artifacts.publish(record.clone()).await;
                session.state = SessionState::Completed;
                info!(
                    target_id = %session.target_id,
                    name = %record.name,
                    size = record.size_bytes,
                    stable = outcome.confirmed_stable,
                    "recording completed"
                );
                self.notify(&session);
                Ok(StopReport {
                    record,
                    frame_count: outcome.frame_count,
                    confirmed_stable: outcome.confirmed_stable,
                })
            }
            Err(e) => {
                session.state = SessionState::Failed;
                warn!(target_id = %session.target_id, err = %e, "recording failed");
                self.notify(&session);
                Err(e)
            }
        }
    }

    /// Current session status for a target, if any session was ever created.
    pub async fn status(&self, target_id: Option<&str>) -> Option<SessionStatus> {
        let tid = match target_id {
            Some(id) => id.to_string(),
            None => self.targets.resolve(None).await.ok()?.target_id().to_string(),
        };
        let slot = self.sessions.read().await.get(&tid).cloned()?;
        let session = slot.lock().await;
        if session.state == SessionState::Idle {
            return None;
        }
        Some(SessionStatus {
            target_id: session.target_id.clone(),
            state: session.state,
            backend: session.backend.to_string(),
            name: session.name.clone(),
            elapsed_seconds: (Utc::now() - session.started_at).num_seconds(),
        })
    }

    /// Number of live (Active or Finalizing) sessions. A slot locked by an
    /// in-flight transition counts as live rather than blocking the caller.
    pub async fn active_count(&self) -> usize {
        let slots: Vec<_> = self.sessions.read().await.values().cloned().collect();
        slots
            .iter()
            .filter(|slot| match slot.try_lock() {
                Ok(session) => session.state.is_live(),
                Err(_) => true,
            })
            .count()
    }

    async fn slot(&self, target_id: &str) -> Arc<Mutex<RecordingSession>> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(target_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RecordingSession {
                    target_id: target_id.to_string(),
                    backend: RecordingBackend::FrameCapture,
                    name: String::new(),
                    dir: PathBuf::new(),
                    started_at: Utc::now(),
                    state: SessionState::Idle,
                    channel: None,
                    frames: None,
                    sub: FrameSubscription {
                        format: FrameFormat::Jpeg,
                        quality: 80,
                        max_width: 1280,
                        max_height: 720,
                    },
                }))
            })
            .clone()
    }

    fn session_dir(&self, target_id: &str) -> PathBuf {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.artifacts
            .root()
            .join(format!("{target_id}-{}", &suffix[..8]))
    }

    fn strategy_for(&self, backend: RecordingBackend) -> Box<dyn RecordingStrategy> {
        match backend {
            RecordingBackend::Proprietary => Box::new(proprietary::ProprietaryStrategy {
                start_timeout: Duration::from_secs(self.settings.start_timeout_secs),
                decode_order: self.settings.payload_decode_order.clone(),
            }),
            RecordingBackend::Context => Box::new(context::ContextStrategy {
                finalize: self.settings.finalize_config(),
            }),
            RecordingBackend::FrameCapture => Box::new(frames::FrameCaptureStrategy),
        }
    }

    fn notify(&self, session: &RecordingSession) {
        self.broadcaster.broadcast(
            "recording.statusChanged",
            json!({
                "targetId": session.target_id,
                "state": session.state,
                "name": session.name,
            }),
        );
    }
}

/// The caller's name, or a timestamped default. File-producing backends get a
/// container extension; frame capture names a directory.
fn artifact_name(requested: Option<&str>, backend: RecordingBackend, format: FrameFormat) -> String {
    match requested {
        Some(name) => name.to_string(),
        None => {
            let stamp = Utc::now().format("%Y%m%d-%H%M%S");
            match backend {
                RecordingBackend::FrameCapture => format!("frames-{stamp}-{}", format.as_str()),
                _ => format!("recording-{stamp}.webm"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ConnectionDescriptor;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ── Test doubles ─────────────────────────────────────────────────────────

    struct MockChannel {
        stop_payload: Value,
        fail_start_command: bool,
        emit_frames: Vec<Vec<u8>>,
        detach_count: AtomicU32,
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl MockChannel {
        fn new(stop_payload: Value) -> Arc<Self> {
            Arc::new(Self {
                stop_payload,
                fail_start_command: false,
                emit_frames: Vec::new(),
                detach_count: AtomicU32::new(0),
                calls: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn with_frames(frames: Vec<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                stop_payload: Value::Null,
                fail_start_command: false,
                emit_frames: frames,
                detach_count: AtomicU32::new(0),
                calls: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn failing_start() -> Arc<Self> {
            Arc::new(Self {
                stop_payload: Value::Null,
                fail_start_command: true,
                emit_frames: Vec::new(),
                detach_count: AtomicU32::new(0),
                calls: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn detaches(&self) -> u32 {
            self.detach_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ControlChannel for MockChannel {
        async fn call(
            &self,
            method: &str,
            _params: Value,
            _timeout: Duration,
        ) -> Result<Value, RecordError> {
            self.calls.lock().unwrap().push(method.to_string());
            match method {
                proprietary::START_COMMAND if self.fail_start_command => {
                    Err(RecordError::channel("start-record refused"))
                }
                proprietary::STOP_COMMAND => Ok(self.stop_payload.clone()),
                _ => Ok(Value::Null),
            }
        }

        async fn start_frames(
            &self,
            _sub: FrameSubscription,
            sink: mpsc::UnboundedSender<CapturedFrame>,
        ) -> Result<(), RecordError> {
            for bytes in &self.emit_frames {
                let _ = sink.send(CapturedFrame {
                    bytes: bytes.clone(),
                    timestamp: Utc::now(),
                });
            }
            Ok(())
        }

        async fn stop_frames(&self) -> Result<(), RecordError> {
            Ok(())
        }

        async fn detach(&self) -> Result<(), RecordError> {
            self.detach_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockTarget {
        id: String,
        descriptor: Option<ConnectionDescriptor>,
        channel: Arc<MockChannel>,
        video_path: std::sync::Mutex<Option<PathBuf>>,
    }

    impl MockTarget {
        fn new(id: &str, endpoint: &str, channel: Arc<MockChannel>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                descriptor: Some(ConnectionDescriptor::parse(endpoint, false)),
                channel,
                video_path: std::sync::Mutex::new(None),
            })
        }

        fn with_context_video(id: &str, video: PathBuf) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                descriptor: Some(ConnectionDescriptor::parse("ws://127.0.0.1:9222/page", true)),
                channel: MockChannel::new(Value::Null),
                video_path: std::sync::Mutex::new(Some(video)),
            })
        }
    }

    #[async_trait]
    impl TargetHandle for MockTarget {
        fn target_id(&self) -> &str {
            &self.id
        }

        fn descriptor(&self) -> Option<&ConnectionDescriptor> {
            self.descriptor.as_ref()
        }

        async fn open_channel(&self) -> Result<Arc<dyn ControlChannel>, RecordError> {
            Ok(self.channel.clone() as Arc<dyn ControlChannel>)
        }

        async fn context_video_path(&self) -> Result<Option<PathBuf>, RecordError> {
            Ok(self.video_path.lock().unwrap().clone())
        }
    }

    // ── Harness ──────────────────────────────────────────────────────────────

    const VENDOR_ENDPOINT: &str =
        "wss://eu.browsergrid.io/vendor/connect?apiKey=k&enableRecording=true";
    const PLAIN_ENDPOINT: &str = "ws://127.0.0.1:9222/devtools/page/AB12";

    struct Harness {
        recorder: Recorder,
        targets: Arc<TargetRegistry>,
        artifacts: Arc<ArtifactStore>,
        _tmp: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(EventBroadcaster::new());
        let targets = Arc::new(TargetRegistry::new(broadcaster.clone()));
        let artifacts = Arc::new(ArtifactStore::new(tmp.path().to_path_buf()));
        let settings = RecordingConfig {
            poll_interval_ms: 5,
            required_stable_polls: 2,
            aggressive_poll_interval_ms: 5,
            aggressive_required_stable_polls: 3,
            ..RecordingConfig::default()
        };
        Harness {
            recorder: Recorder::new(settings, targets.clone(), artifacts.clone(), broadcaster),
            targets,
            artifacts,
            _tmp: tmp,
        }
    }

    fn frame_opts() -> StartOptions {
        StartOptions {
            use_frame_capture: true,
            ..StartOptions::default()
        }
    }

    const STOP_WAIT: Duration = Duration::from_secs(2);

    // ── State machine ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn double_start_fails_already_active_for_every_backend() {
        // Proprietary and frame capture.
        for (endpoint, opts) in [
            (VENDOR_ENDPOINT, StartOptions::default()),
            (PLAIN_ENDPOINT, frame_opts()),
        ] {
            let h = harness();
            let channel = MockChannel::with_frames(vec![vec![1, 2, 3]]);
            h.targets
                .register(MockTarget::new("t1", endpoint, channel))
                .await;

            h.recorder.start(Some("t1"), opts.clone()).await.unwrap();
            let err = h.recorder.start(Some("t1"), opts).await.unwrap_err();
            assert!(
                matches!(err, RecordError::AlreadyActive { .. }),
                "endpoint {endpoint}: {err:?}"
            );
        }

        // Context.
        let h = harness();
        h.targets
            .register(MockTarget::with_context_video(
                "t1",
                h._tmp.path().join("never-flushed.webm"),
            ))
            .await;
        h.recorder.start(Some("t1"), StartOptions::default()).await.unwrap();
        let err = h
            .recorder
            .start(Some("t1"), StartOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::AlreadyActive { .. }));
    }

    #[tokio::test]
    async fn stop_without_start_fails_not_active() {
        let h = harness();
        h.targets
            .register(MockTarget::new("t1", PLAIN_ENDPOINT, MockChannel::new(Value::Null)))
            .await;
        let err = h.recorder.stop(Some("t1"), STOP_WAIT).await.unwrap_err();
        assert!(matches!(err, RecordError::NotActive { .. }));
    }

    #[tokio::test]
    async fn target_is_free_again_after_completed_session() {
        let h = harness();
        let payload = Value::String(BASE64.encode(b"clip"));
        let channel = MockChannel::new(payload);
        h.targets
            .register(MockTarget::new("t1", VENDOR_ENDPOINT, channel.clone()))
            .await;

        h.recorder
            .start(Some("t1"), StartOptions { name: Some("a.webm".into()), ..Default::default() })
            .await
            .unwrap();
        let err = h
            .recorder
            .start(Some("t1"), StartOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::AlreadyActive { .. }));

        h.recorder.stop(Some("t1"), STOP_WAIT).await.unwrap();
        // Terminal state frees the target immediately.
        h.recorder
            .start(Some("t1"), StartOptions { name: Some("b.webm".into()), ..Default::default() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_start_lands_in_failed_and_releases_handle() {
        let h = harness();
        let channel = MockChannel::failing_start();
        h.targets
            .register(MockTarget::new("t1", VENDOR_ENDPOINT, channel.clone()))
            .await;

        let err = h
            .recorder
            .start(Some("t1"), StartOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Channel { .. }));
        assert_eq!(channel.detaches(), 1, "handle released exactly once");

        let status = h.recorder.status(Some("t1")).await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        // A failed session still frees the target.
        assert!(h
            .recorder
            .start(Some("t1"), StartOptions::default())
            .await
            .is_err_and(|e| matches!(e, RecordError::Channel { .. })));
    }

    #[tokio::test]
    async fn status_reports_active_session() {
        let h = harness();
        h.targets
            .register(MockTarget::new(
                "t1",
                VENDOR_ENDPOINT,
                MockChannel::new(Value::String(BASE64.encode(b"x"))),
            ))
            .await;

        assert!(h.recorder.status(Some("t1")).await.is_none());
        h.recorder
            .start(Some("t1"), StartOptions { name: Some("s.webm".into()), ..Default::default() })
            .await
            .unwrap();
        let status = h.recorder.status(Some("t1")).await.unwrap();
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.name, "s.webm");
        assert_eq!(status.backend, "proprietary");
        assert!(status.elapsed_seconds >= 0);
        assert_eq!(h.recorder.active_count().await, 1);
    }

    // ── Proprietary strategy ─────────────────────────────────────────────────

    #[tokio::test]
    async fn proprietary_round_trip_preserves_bytes() {
        for size in [1usize, 1_000_000] {
            let h = harness();
            let original: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let channel = MockChannel::new(Value::String(BASE64.encode(&original)));
            h.targets
                .register(MockTarget::new("t1", VENDOR_ENDPOINT, channel.clone()))
                .await;

            h.recorder
                .start(
                    Some("t1"),
                    StartOptions { name: Some("clip.webm".into()), ..Default::default() },
                )
                .await
                .unwrap();
            let report = h.recorder.stop(Some("t1"), STOP_WAIT).await.unwrap();

            assert_eq!(report.record.size_bytes as usize, size);
            assert_eq!(channel.detaches(), 1);

            let resolved = h.artifacts.resolve("clip.webm").await.unwrap();
            let bytes = std::fs::read(&resolved.path).unwrap();
            assert_eq!(bytes, original, "byte-for-byte for size {size}");
        }
    }

    #[tokio::test]
    async fn proprietary_rejects_empty_payload_at_write_time() {
        let h = harness();
        let channel = MockChannel::new(Value::String(BASE64.encode(b"")));
        h.targets
            .register(MockTarget::new("t1", VENDOR_ENDPOINT, channel.clone()))
            .await;

        h.recorder
            .start(Some("t1"), StartOptions { name: Some("empty.webm".into()), ..Default::default() })
            .await
            .unwrap();
        let err = h.recorder.stop(Some("t1"), STOP_WAIT).await.unwrap_err();
        assert!(matches!(err, RecordError::EmptyArtifact));
        assert_eq!(channel.detaches(), 1, "handle released on the error path too");

        let status = h.recorder.status(Some("t1")).await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
        assert!(h.artifacts.resolve("empty.webm").await.is_err());
    }

    #[tokio::test]
    async fn proprietary_rejects_unrecognized_payload() {
        let h = harness();
        let channel = MockChannel::new(json!({ "unexpected": true }));
        h.targets
            .register(MockTarget::new("t1", VENDOR_ENDPOINT, channel.clone()))
            .await;

        h.recorder.start(Some("t1"), StartOptions::default()).await.unwrap();
        let err = h.recorder.stop(Some("t1"), STOP_WAIT).await.unwrap_err();
        assert!(matches!(err, RecordError::UnsupportedPayload));
        assert_eq!(channel.detaches(), 1);
    }

    // ── Frame capture strategy ───────────────────────────────────────────────

    #[tokio::test]
    async fn frame_capture_writes_frames_and_manifest() {
        let h = harness();
        let channel = MockChannel::with_frames(vec![vec![1u8; 10], vec![2u8; 20], vec![3u8; 30]]);
        h.targets
            .register(MockTarget::new("t1", PLAIN_ENDPOINT, channel.clone()))
            .await;

        h.recorder
            .start(
                Some("t1"),
                StartOptions {
                    name: Some("capture".into()),
                    use_frame_capture: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let report = h.recorder.stop(Some("t1"), STOP_WAIT).await.unwrap();

        assert_eq!(report.frame_count, Some(3));
        assert!(report.record.is_dir);
        assert_eq!(channel.detaches(), 1);

        let manifest_path = report.record.path.join(frames::MANIFEST_FILENAME);
        let manifest: Value =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["frameCount"], json!(3));
        assert_eq!(manifest["format"], json!("jpeg"));
        assert_eq!(manifest["frames"].as_array().unwrap().len(), 3);

        let first = report.record.path.join("frame-00000.jpeg");
        assert_eq!(std::fs::read(first).unwrap(), vec![1u8; 10]);
    }

    #[tokio::test]
    async fn frame_capture_with_zero_frames_fails_no_frames() {
        let h = harness();
        let channel = MockChannel::with_frames(Vec::new());
        h.targets
            .register(MockTarget::new("t1", PLAIN_ENDPOINT, channel.clone()))
            .await;

        h.recorder.start(Some("t1"), frame_opts()).await.unwrap();
        let err = h.recorder.stop(Some("t1"), STOP_WAIT).await.unwrap_err();
        assert!(matches!(err, RecordError::NoFrames));
        assert_eq!(channel.detaches(), 1);
        // Never a manifest with frameCount 0.
        assert!(h.artifacts.resolve("capture").await.is_err());
    }

    // ── Context strategy ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn context_stop_waits_for_host_file_and_publishes() {
        let h = harness();
        let video = h._tmp.path().join("context").join("t1").join("host-clip.webm");
        std::fs::create_dir_all(video.parent().unwrap()).unwrap();
        std::fs::write(&video, vec![7u8; 512]).unwrap();

        h.targets
            .register(MockTarget::with_context_video("t1", video.clone()))
            .await;

        h.recorder
            .start(Some("t1"), StartOptions { name: Some("ctx.webm".into()), ..Default::default() })
            .await
            .unwrap();
        let report = h.recorder.stop(Some("t1"), STOP_WAIT).await.unwrap();

        assert_eq!(report.record.path, video);
        assert_eq!(report.record.size_bytes, 512);
        assert!(report.confirmed_stable);
    }

    #[tokio::test]
    async fn context_stop_times_out_when_host_never_produces_a_path() {
        let h = harness();
        let target = Arc::new(MockTarget {
            id: "t1".into(),
            descriptor: Some(ConnectionDescriptor::parse("ws://127.0.0.1:9222/page", true)),
            channel: MockChannel::new(Value::Null),
            video_path: std::sync::Mutex::new(None),
        });
        h.targets.register(target).await;

        h.recorder.start(Some("t1"), StartOptions::default()).await.unwrap();
        let err = h
            .recorder
            .stop(Some("t1"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::Timeout { .. }));

        let status = h.recorder.status(Some("t1")).await.unwrap();
        assert_eq!(status.state, SessionState::Failed);
    }

    // ── Names ────────────────────────────────────────────────────────────────

    #[test]
    fn generated_names_carry_backend_shapes() {
        let file = artifact_name(None, RecordingBackend::Proprietary, FrameFormat::Jpeg);
        assert!(file.starts_with("recording-") && file.ends_with(".webm"));
        let dir = artifact_name(None, RecordingBackend::FrameCapture, FrameFormat::Png);
        assert!(dir.starts_with("frames-") && dir.ends_with("png"));
        assert_eq!(
            artifact_name(Some("mine.webm"), RecordingBackend::Context, FrameFormat::Jpeg),
            "mine.webm"
        );
    }
}
