// SPDX-License-Identifier: MIT
//! Frame-capture backend: raw frame-by-frame capture over the control channel.
//!
//! Frames arrive as events and are queued by the channel (which also
//! acknowledges each one to the source — see `control`). Stop drains the
//! queue and materializes the session directory: one file per frame plus a
//! manifest. The directory is the artifact; compiling the frames into a
//! playable container is an external tool's job.

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::browser::TargetHandle;
use crate::control::CapturedFrame;

use super::error::RecordError;
use super::{RecordingSession, RecordingStrategy, StopContext, StopOutcome};

pub const MANIFEST_FILENAME: &str = "manifest.json";

pub struct FrameCaptureStrategy;

#[async_trait]
impl RecordingStrategy for FrameCaptureStrategy {
    async fn start(
        &self,
        target: &dyn TargetHandle,
        session: &mut RecordingSession,
    ) -> Result<(), RecordError> {
        let channel = target.open_channel().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = channel.start_frames(session.sub, tx).await {
            if let Err(detach_err) = channel.detach().await {
                warn!(err = %detach_err, "detach after failed screencast start also failed");
            }
            return Err(e);
        }
        debug!(
            target_id = %session.target_id,
            format = session.sub.format.as_str(),
            quality = session.sub.quality,
            "frame capture started"
        );
        session.channel = Some(channel);
        session.frames = Some(rx);
        Ok(())
    }

    async fn stop(
        &self,
        _target: &dyn TargetHandle,
        cx: &mut StopContext,
    ) -> Result<StopOutcome, RecordError> {
        let channel = cx.channel.take().ok_or_else(|| {
            RecordError::Internal("frame-capture session has no control channel".into())
        })?;

        let stop_result = channel.stop_frames().await;
        if let Err(e) = channel.detach().await {
            warn!(err = %e, "control channel detach failed");
        }
        stop_result?;

        let mut rx = cx.frames.take().ok_or_else(|| {
            RecordError::Internal("frame-capture session has no frame queue".into())
        })?;
        rx.close();
        let mut frames: Vec<CapturedFrame> = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }

        if frames.is_empty() {
            return Err(RecordError::NoFrames);
        }

        tokio::fs::create_dir_all(&cx.dir).await?;
        let ext = cx.sub.format.extension();
        let mut total_bytes: u64 = 0;
        let mut entries = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            let filename = format!("frame-{index:05}.{ext}");
            tokio::fs::write(cx.dir.join(&filename), &frame.bytes).await?;
            total_bytes += frame.bytes.len() as u64;
            entries.push(json!({
                "filename": filename,
                "timestamp": frame.timestamp.to_rfc3339(),
                "index": index,
            }));
        }

        let duration_ms = (frames[frames.len() - 1].timestamp - frames[0].timestamp)
            .num_milliseconds()
            .max(0);
        let manifest = json!({
            "frameCount": frames.len(),
            "durationMs": duration_ms,
            "format": cx.sub.format.as_str(),
            "frames": entries,
        });
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| RecordError::Internal(format!("manifest serialization: {e}")))?;
        tokio::fs::write(cx.dir.join(MANIFEST_FILENAME), &manifest_bytes).await?;
        total_bytes += manifest_bytes.len() as u64;

        debug!(
            dir = %cx.dir.display(),
            frames = frames.len(),
            duration_ms,
            "frame capture materialized"
        );

        Ok(StopOutcome {
            path: cx.dir.clone(),
            size_bytes: total_bytes,
            is_dir: true,
            frame_count: Some(frames.len()),
            confirmed_stable: true,
        })
    }
}
