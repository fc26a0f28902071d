use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::control::{FrameFormat, FrameSubscription};
use crate::recorder::finalize::FinalizeConfig;
use crate::recorder::payload::{PayloadShape, DEFAULT_DECODE_ORDER};

const DEFAULT_PORT: u16 = 4400;
const DEFAULT_ARTIFACT_PORT: u16 = 4401;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── RecordingConfig ─────────────────────────────────────────────────────────

/// Recording subsystem configuration (`[recording]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Maintain a host-managed continuous recording for every new connection.
    /// This is the startup opt-in the Context backend depends on; flipping it
    /// after a target connected has no effect on that target. Default: false.
    pub record_context: bool,

    /// Seconds allowed for the vendor start-record command. Default: 10.
    pub start_timeout_secs: u64,

    /// Stop-payload decode attempts, in priority order. Hosted providers do
    /// not agree on a payload shape, so deployments can reorder this.
    pub payload_decode_order: Vec<PayloadShape>,

    /// Finalization poll interval in normal mode (ms). Default: 250.
    pub poll_interval_ms: u64,
    /// Consecutive unchanged size samples required in normal mode. Default: 3.
    pub required_stable_polls: u32,
    /// Finalization poll interval in aggressive mode (ms). Default: 500.
    pub aggressive_poll_interval_ms: u64,
    /// Consecutive unchanged size samples required in aggressive mode.
    /// Default: 6.
    pub aggressive_required_stable_polls: u32,

    /// Default captured-frame format. Default: jpeg.
    pub frame_format: FrameFormat,
    /// Default frame compression quality (1..=100). Default: 80.
    pub frame_quality: u8,
    /// Default maximum frame width in pixels. Default: 1280.
    pub frame_max_width: u32,
    /// Default maximum frame height in pixels. Default: 720.
    pub frame_max_height: u32,

    /// Largest artifact inlined into an RPC response without `forceInline`.
    /// Default: 8 MiB.
    pub max_inline_bytes: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            record_context: false,
            start_timeout_secs: 10,
            payload_decode_order: DEFAULT_DECODE_ORDER.to_vec(),
            poll_interval_ms: 250,
            required_stable_polls: 3,
            aggressive_poll_interval_ms: 500,
            aggressive_required_stable_polls: 6,
            frame_format: FrameFormat::Jpeg,
            frame_quality: 80,
            frame_max_width: 1280,
            frame_max_height: 720,
            max_inline_bytes: 8 * 1024 * 1024,
        }
    }
}

impl RecordingConfig {
    pub fn finalize_config(&self) -> FinalizeConfig {
        FinalizeConfig {
            poll_interval: std::time::Duration::from_millis(self.poll_interval_ms),
            required_stable_polls: self.required_stable_polls,
            aggressive_poll_interval: std::time::Duration::from_millis(
                self.aggressive_poll_interval_ms,
            ),
            aggressive_required_stable_polls: self.aggressive_required_stable_polls,
        }
    }

    /// Merge caller-supplied frame options over the configured defaults.
    pub fn frame_subscription(
        &self,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<FrameFormat>,
        quality: Option<u8>,
    ) -> FrameSubscription {
        FrameSubscription {
            format: format.unwrap_or(self.frame_format),
            quality: quality.unwrap_or(self.frame_quality),
            max_width: width.unwrap_or(self.frame_max_width),
            max_height: height.unwrap_or(self.frame_max_height),
        }
    }
}

// ─── DaemonConfig ────────────────────────────────────────────────────────────

/// Top-level daemon configuration.
///
/// Layering, lowest to highest precedence: built-in defaults, then
/// `{data_dir}/config.toml`, then CLI flags / `REELD_*` environment variables
/// (applied by the caller of [`DaemonConfig::new`]).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// JSON-RPC WebSocket port. Default: 4400.
    pub port: u16,
    /// Artifact HTTP server port. Default: 4401.
    pub artifact_port: u16,
    /// Bind address for both servers. Default: 127.0.0.1.
    pub bind_address: String,
    /// Data directory for config, auth token, and recorded artifacts.
    pub data_dir: PathBuf,
    /// Log filter (trace, debug, info, warn, error). Default: info.
    pub log: String,
    /// Optional log file (rotated daily).
    pub log_file: Option<PathBuf>,
    pub recording: RecordingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            artifact_port: DEFAULT_ARTIFACT_PORT,
            bind_address: default_bind_address(),
            data_dir: default_data_dir(),
            log: "info".to_string(),
            log_file: None,
            recording: RecordingConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Resolve the effective config: file layered under explicit overrides.
    pub fn new(
        port: Option<u16>,
        artifact_port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        record_context: Option<bool>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let mut config = Self::load_file(&data_dir.join("config.toml")).unwrap_or_default();
        config.data_dir = data_dir;
        if let Some(p) = port {
            config.port = p;
        }
        if let Some(p) = artifact_port {
            config.artifact_port = p;
        }
        if let Some(l) = log {
            config.log = l;
        }
        if let Some(rc) = record_context {
            config.recording.record_context = rc;
        }
        config
    }

    fn load_file(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&text) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(path = %path.display(), err = %e, "config.toml is invalid — using defaults");
                None
            }
        }
    }

    /// Root under which all session-scoped artifact directories are created.
    pub fn output_root(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    /// Directory the host writes its continuous recording into for a target.
    pub fn context_video_dir(&self, target_id: &str) -> PathBuf {
        self.output_root().join("context").join(target_id)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".reeld"))
        .unwrap_or_else(|| PathBuf::from(".reeld"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DaemonConfig::default();
        assert_eq!(config.port, 4400);
        assert_eq!(config.artifact_port, 4401);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert!(!config.recording.record_context);
        assert_eq!(config.recording.payload_decode_order, DEFAULT_DECODE_ORDER);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let config = DaemonConfig::new(
            Some(5000),
            None,
            Some(PathBuf::from("/tmp/reeld-test")),
            Some("debug".to_string()),
            Some(true),
        );
        assert_eq!(config.port, 5000);
        assert_eq!(config.artifact_port, 4401);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/reeld-test"));
        assert_eq!(config.log, "debug");
        assert!(config.recording.record_context);
    }

    #[test]
    fn config_file_is_layered_under_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
port = 9000
[recording]
record_context = true
frame_quality = 55
payload_decode_order = ["length-prefixed", "base64"]
"#,
        )
        .unwrap();

        let config = DaemonConfig::new(
            Some(9100),
            None,
            Some(dir.path().to_path_buf()),
            None,
            None,
        );
        // CLI override beats the file; file beats defaults.
        assert_eq!(config.port, 9100);
        assert!(config.recording.record_context);
        assert_eq!(config.recording.frame_quality, 55);
        assert_eq!(
            config.recording.payload_decode_order,
            vec![PayloadShape::LengthPrefixed, PayloadShape::Base64]
        );
    }

    #[test]
    fn frame_subscription_merges_caller_options() {
        let recording = RecordingConfig::default();
        let sub = recording.frame_subscription(Some(640), None, None, Some(50));
        assert_eq!(sub.max_width, 640);
        assert_eq!(sub.max_height, 720);
        assert_eq!(sub.quality, 50);
        assert_eq!(sub.format, FrameFormat::Jpeg);
    }
}
