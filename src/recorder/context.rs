// SPDX-License-Identifier: MIT
//! Context backend: a host-managed continuous recording that already exists.
//!
//! The host started recording when the connection was established; this
//! strategy never creates a second recording resource. Starting one here
//! would desynchronize the visible session from the recorded one — that is a
//! design error, not an inefficiency. Stop is therefore pure observation:
//! find the host's file, wait for its bytes to settle.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::browser::TargetHandle;

use super::error::RecordError;
use super::finalize::{self, FinalizeConfig};
use super::{RecordingSession, RecordingStrategy, StopContext, StopOutcome};

pub struct ContextStrategy {
    pub finalize: FinalizeConfig,
}

#[async_trait]
impl RecordingStrategy for ContextStrategy {
    async fn start(
        &self,
        _target: &dyn TargetHandle,
        session: &mut RecordingSession,
    ) -> Result<(), RecordError> {
        // Nothing to acquire: the host recording is already live. The session
        // only marks that this segment is attached to it.
        info!(target_id = %session.target_id, "attached to host-managed recording");
        Ok(())
    }

    async fn stop(
        &self,
        target: &dyn TargetHandle,
        cx: &mut StopContext,
    ) -> Result<StopOutcome, RecordError> {
        let deadline = tokio::time::Instant::now() + cx.max_wait;
        let probe_interval = self.finalize.poll_interval;

        // The host flushes asynchronously — the file path may not exist yet.
        let path = loop {
            if let Some(path) = target.context_video_path().await? {
                break path;
            }
            if tokio::time::Instant::now() + probe_interval > deadline {
                return Err(RecordError::timeout(
                    "host-managed recording path",
                    cx.max_wait.as_secs(),
                ));
            }
            tokio::time::sleep(probe_interval).await;
        };
        debug!(path = %path.display(), "host recording path resolved");

        // The path may still be mid-flush; hand the remaining budget to the
        // stability wait. Aggressive mode: context recordings flush in bursts.
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let wait = finalize::wait_for_stable(&path, remaining, true, &self.finalize).await;
        if wait.size_bytes == 0 {
            return Err(RecordError::timeout(
                "host-managed recording flush",
                cx.max_wait.as_secs(),
            ));
        }

        Ok(StopOutcome {
            path,
            size_bytes: wait.size_bytes,
            is_dir: false,
            frame_count: None,
            confirmed_stable: wait.stable,
        })
    }
}
