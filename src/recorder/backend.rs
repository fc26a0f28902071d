// SPDX-License-Identifier: MIT
//! Recording backend selection.
//!
//! The connection descriptor is inspected once per session; the chosen backend
//! is immutable for that session's lifetime. The old pattern of re-sniffing
//! the connection string on every call is exactly what this replaces.

use std::fmt;

use crate::browser::ConnectionDescriptor;

use super::error::RecordError;

/// Endpoint markers identifying a hosted provider with the proprietary
/// record/stop command pair.
pub const VENDOR_HOST_MARKER: &str = "browsergrid";
pub const VENDOR_PATH_MARKER: &str = "/vendor/connect";
pub const VENDOR_TOKEN_PARAM: &str = "apiKey";

/// Query flag the provider requires before its recording commands work.
pub const RECORDING_FLAG: &str = "enableRecording";

/// Daemon startup flag enabling host-managed continuous recording.
pub const CONTEXT_FLAG: &str = "--record-context";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingBackend {
    /// Vendor record/stop command pair over the control channel.
    Proprietary,
    /// Host-managed continuous recording attached to the existing session.
    Context,
    /// Raw frame-by-frame capture over the control channel.
    FrameCapture,
}

impl fmt::Display for RecordingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Proprietary => "proprietary",
            Self::Context => "context",
            Self::FrameCapture => "frame-capture",
        })
    }
}

/// Pick a backend for a new session. Rules are evaluated in order:
///
/// 1. vendor-marked endpoint → Proprietary, but only with the explicit
///    recording opt-in flag in the connection query
/// 2. caller asked for frame capture → FrameCapture (any remote endpoint)
/// 3. host-managed recording was configured at connection time → Context
/// 4. nothing applies → NotConfigured
pub fn select(
    descriptor: Option<&ConnectionDescriptor>,
    frame_capture_requested: bool,
) -> Result<RecordingBackend, RecordError> {
    if let Some(d) = descriptor {
        if matches_vendor(d) {
            if d.query_flag(RECORDING_FLAG) {
                return Ok(RecordingBackend::Proprietary);
            }
            return Err(RecordError::NotEnabled {
                remediation: format!(
                    "the provider requires `{RECORDING_FLAG}=true` in the connection URL at \
                     connect time; reconnect with e.g. {}",
                    with_recording_flag(&d.endpoint)
                ),
            });
        }
    }

    if frame_capture_requested {
        return Ok(RecordingBackend::FrameCapture);
    }

    if descriptor.map(|d| d.context_recording).unwrap_or(false) {
        return Ok(RecordingBackend::Context);
    }

    Err(RecordError::NotConfigured {
        remediation: format!(
            "no recording backend applies to this connection; start the daemon with \
             `{CONTEXT_FLAG}` (or set `record_context = true` under `[recording]` in \
             config.toml) and reconnect, or pass `useFrameCapture: true`"
        ),
    })
}

fn matches_vendor(d: &ConnectionDescriptor) -> bool {
    d.host().contains(VENDOR_HOST_MARKER)
        || d.path().contains(VENDOR_PATH_MARKER)
        || d.has_query(VENDOR_TOKEN_PARAM)
}

/// A corrected example URL with the opt-in flag appended.
fn with_recording_flag(endpoint: &str) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{sep}{RECORDING_FLAG}=true")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(endpoint: &str, context_recording: bool) -> ConnectionDescriptor {
        ConnectionDescriptor::parse(endpoint, context_recording)
    }

    #[test]
    fn vendor_endpoint_with_flag_selects_proprietary() {
        let d = descriptor(
            "wss://eu.browsergrid.io/session?apiKey=k&enableRecording=true",
            false,
        );
        assert_eq!(select(Some(&d), false).unwrap(), RecordingBackend::Proprietary);
    }

    #[test]
    fn vendor_endpoint_without_flag_is_not_enabled() {
        let d = descriptor("wss://eu.browsergrid.io/session?apiKey=k", false);
        let err = select(Some(&d), false).unwrap_err();
        let RecordError::NotEnabled { remediation } = &err else {
            panic!("expected NotEnabled, got {err:?}");
        };
        // The remediation names the literal flag and a corrected example URL.
        assert!(remediation.contains("enableRecording=true"));
        assert!(remediation.contains("wss://eu.browsergrid.io/session?apiKey=k&enableRecording=true"));
    }

    #[test]
    fn vendor_match_by_token_param_alone() {
        let d = descriptor("wss://proxy.example.com/ws?apiKey=secret", false);
        assert!(matches!(
            select(Some(&d), false),
            Err(RecordError::NotEnabled { .. })
        ));
    }

    #[test]
    fn vendor_rule_wins_over_frame_capture_request() {
        let d = descriptor("wss://eu.browsergrid.io/session?apiKey=k", false);
        // Rules are ordered: the vendor candidate (and its missing opt-in)
        // is decided before the frame-capture request is considered.
        assert!(matches!(
            select(Some(&d), true),
            Err(RecordError::NotEnabled { .. })
        ));
    }

    #[test]
    fn frame_capture_request_works_for_plain_endpoints() {
        let d = descriptor("ws://127.0.0.1:9222/devtools/page/AB12", false);
        assert_eq!(select(Some(&d), true).unwrap(), RecordingBackend::FrameCapture);
        assert_eq!(select(None, true).unwrap(), RecordingBackend::FrameCapture);
    }

    #[test]
    fn context_capability_selects_context() {
        let d = descriptor("ws://127.0.0.1:9222/devtools/page/AB12", true);
        assert_eq!(select(Some(&d), false).unwrap(), RecordingBackend::Context);
    }

    #[test]
    fn nothing_applicable_is_not_configured() {
        let d = descriptor("ws://127.0.0.1:9222/devtools/page/AB12", false);
        let err = select(Some(&d), false).unwrap_err();
        let RecordError::NotConfigured { remediation } = &err else {
            panic!("expected NotConfigured, got {err:?}");
        };
        assert!(remediation.contains("--record-context"));
    }
}
