// SPDX-License-Identifier: MIT
//! Session-scoped control channel to a browser target.
//!
//! A control channel issues recording commands and receives frame events for
//! exactly one target. The trait seam keeps the recording strategies testable
//! without a live browser; [`cdp::CdpChannel`] is the production
//! implementation speaking DevTools protocol over WebSocket.

pub mod cdp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::recorder::error::RecordError;

/// Image format for captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Jpeg,
    Png,
}

impl FrameFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    /// File extension for frame files.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

/// Parameters for a frame-event subscription.
#[derive(Debug, Clone, Copy)]
pub struct FrameSubscription {
    pub format: FrameFormat,
    /// Compression quality, 1..=100 (jpeg only; ignored for png).
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
}

/// One frame received from the target, stamped on arrival.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub bytes: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Command/event channel owned by exactly one recording session.
///
/// Handles must be detached on every exit path, success or failure — the
/// remote side holds resources until told otherwise.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Issue a command and await its reply, bounded by `timeout`.
    async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RecordError>;

    /// Begin a frame subscription. Incoming frames are acknowledged to the
    /// source by the channel itself — acknowledgment is flow control the
    /// source depends on, never the consumer's responsibility — and pushed
    /// into `sink`.
    async fn start_frames(
        &self,
        sub: FrameSubscription,
        sink: mpsc::UnboundedSender<CapturedFrame>,
    ) -> Result<(), RecordError>;

    /// End the frame subscription. Frames already queued remain readable.
    async fn stop_frames(&self) -> Result<(), RecordError>;

    /// Release the channel and its remote resources. Safe to call once per
    /// handle; the session registry guarantees exactly one call per exit path.
    async fn detach(&self) -> Result<(), RecordError>;
}
