pub mod artifacts;
pub mod browser;
pub mod config;
pub mod control;
pub mod ipc;
pub mod recorder;

use std::sync::Arc;

use artifacts::ArtifactStore;
use browser::TargetRegistry;
use config::DaemonConfig;
use ipc::event::EventBroadcaster;
use recorder::Recorder;

/// Shared application state passed to every RPC handler and background task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub broadcaster: Arc<EventBroadcaster>,
    /// Connected browser targets, keyed by target id.
    pub targets: Arc<TargetRegistry>,
    /// Recording sessions and their strategies.
    pub recorder: Arc<Recorder>,
    /// Published artifacts, served by the artifact HTTP server.
    pub artifacts: Arc<ArtifactStore>,
    pub started_at: std::time::Instant,
    /// Stable machine identity (SHA-256 fingerprint, truncated).
    pub daemon_id: String,
    /// Local WebSocket auth token.  Every new connection must send a
    /// `daemon.auth` RPC with this token before any other method call.
    /// Empty string means auth is disabled (not recommended).
    pub auth_token: String,
}

impl AppContext {
    /// Wire up the full service graph from a resolved config.
    pub fn build(config: DaemonConfig, daemon_id: String, auth_token: String) -> Self {
        let config = Arc::new(config);
        let broadcaster = Arc::new(EventBroadcaster::new());
        let targets = Arc::new(TargetRegistry::new(broadcaster.clone()));
        let artifacts = Arc::new(ArtifactStore::new(config.output_root()));
        let recorder = Arc::new(Recorder::new(
            config.recording.clone(),
            targets.clone(),
            artifacts.clone(),
            broadcaster.clone(),
        ));
        Self {
            config,
            broadcaster,
            targets,
            recorder,
            artifacts,
            started_at: std::time::Instant::now(),
            daemon_id,
            auth_token,
        }
    }
}
