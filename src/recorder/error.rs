// SPDX-License-Identifier: MIT
//! Typed error taxonomy for the recording subsystem.
//!
//! Every variant carries a stable machine code (see [`RecordError::code`]) and,
//! where the caller can actually do something about it, remediation text. RPC
//! handlers serialise these into structured `{code, message, remediation}`
//! objects — raw transport errors never reach the caller.

use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The endpoint supports recording but the opt-in flag was absent at
    /// connection time. Never retried automatically.
    #[error("recording is not enabled for this browser endpoint")]
    NotEnabled { remediation: String },

    /// No recording backend applies to this target. Never retried automatically.
    #[error("no recording backend is configured for this target")]
    NotConfigured { remediation: String },

    /// `start` while a session is Active or Finalizing for the same target.
    #[error("a recording is already active for target {target_id}")]
    AlreadyActive { target_id: String },

    /// `stop` with no Active session for the target.
    #[error("no active recording for target {target_id}")]
    NotActive { target_id: String },

    /// A protocol call or finalization wait exceeded its bound.
    #[error("{what} did not complete within {secs}s")]
    Timeout { what: String, secs: u64 },

    /// The control channel failed mid-command.
    #[error("control channel failure: {detail}")]
    Channel { detail: String },

    /// The backend returned a stop payload in a shape none of the configured
    /// decoders recognise.
    #[error("recording backend returned a payload in an unrecognized shape")]
    UnsupportedPayload,

    /// The normalized artifact was zero bytes.
    #[error("recording backend returned an empty artifact")]
    EmptyArtifact,

    /// Frame capture stopped with nothing captured.
    #[error("frame capture stopped with zero captured frames")]
    NoFrames,

    /// Artifact lookup miss. `listing` is a debug dump of known artifacts and
    /// scanned directories, included in the message shown to the caller.
    #[error("artifact not found: {name}")]
    NotFound { name: String, listing: String },

    /// Requested byte range cannot be satisfied for the artifact's size.
    #[error("invalid byte range")]
    InvalidRange,

    /// Artifact name contained a parent-directory segment. Rejected before any
    /// filesystem access.
    #[error("artifact name contains a path traversal segment")]
    TraversalAttempt,

    /// No connected browser target to record.
    #[error("no connected browser target")]
    NoTarget,

    /// Anything unexpected. Scoped to one session or request, never fatal.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RecordError {
    pub fn channel(detail: impl Into<String>) -> Self {
        Self::Channel {
            detail: detail.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            secs,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotEnabled { .. } => "not_enabled",
            Self::NotConfigured { .. } => "not_configured",
            Self::AlreadyActive { .. } => "already_active",
            Self::NotActive { .. } => "not_active",
            Self::Timeout { .. } => "timeout",
            Self::Channel { .. } => "channel_error",
            Self::UnsupportedPayload => "unsupported_payload",
            Self::EmptyArtifact => "empty_artifact",
            Self::NoFrames => "no_frames",
            Self::NotFound { .. } => "not_found",
            Self::InvalidRange => "invalid_range",
            Self::TraversalAttempt => "traversal_attempt",
            Self::NoTarget => "no_target",
            Self::Internal(_) => "internal",
        }
    }

    /// Remediation text, when the caller can act on it.
    pub fn remediation(&self) -> Option<&str> {
        match self {
            Self::NotEnabled { remediation } | Self::NotConfigured { remediation } => {
                Some(remediation)
            }
            Self::NoTarget => Some("connect a browser target first (browser.connect)"),
            _ => None,
        }
    }

    /// Structured error object for RPC results.
    pub fn to_error_object(&self) -> Value {
        let mut message = self.to_string();
        if let Self::NotFound { listing, .. } = self {
            message = format!("{message}\n{listing}");
        }
        let mut obj = json!({
            "code": self.code(),
            "message": message,
        });
        if let Some(r) = self.remediation() {
            obj["remediation"] = json!(r);
        }
        obj
    }
}

impl From<std::io::Error> for RecordError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("io error: {e}"))
    }
}
