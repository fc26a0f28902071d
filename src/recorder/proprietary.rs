// SPDX-License-Identifier: MIT
//! Proprietary backend: the hosted provider's record/stop command pair.
//!
//! The provider records on its own infrastructure and hands the finished bytes
//! back in the stop reply. Our only obligations are bounding the commands,
//! normalizing whatever payload shape arrives, persisting verified bytes, and
//! releasing the control channel no matter what happened in between.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::browser::TargetHandle;

use super::error::RecordError;
use super::payload::{self, PayloadShape};
use super::{RecordingSession, RecordingStrategy, StopContext, StopOutcome};

/// Vendor command names, issued over the control channel.
pub const START_COMMAND: &str = "Recording.start";
pub const STOP_COMMAND: &str = "Recording.stop";

pub struct ProprietaryStrategy {
    pub start_timeout: Duration,
    pub decode_order: Vec<PayloadShape>,
}

#[async_trait]
impl RecordingStrategy for ProprietaryStrategy {
    async fn start(
        &self,
        target: &dyn TargetHandle,
        session: &mut RecordingSession,
    ) -> Result<(), RecordError> {
        let channel = target.open_channel().await?;
        if let Err(e) = channel.call(START_COMMAND, json!({}), self.start_timeout).await {
            // A handle from a failed start must not linger on the remote side.
            if let Err(detach_err) = channel.detach().await {
                warn!(err = %detach_err, "detach after failed start-record also failed");
            }
            return Err(e);
        }
        debug!(target_id = %session.target_id, "provider recording started");
        session.channel = Some(channel);
        Ok(())
    }

    async fn stop(
        &self,
        _target: &dyn TargetHandle,
        cx: &mut StopContext,
    ) -> Result<StopOutcome, RecordError> {
        let channel = cx.channel.take().ok_or_else(|| {
            RecordError::Internal("proprietary session has no control channel".into())
        })?;

        let call_result = channel.call(STOP_COMMAND, json!({}), cx.max_wait).await;
        // Detach runs unconditionally; a detach failure must not mask the
        // stop command's own error.
        if let Err(e) = channel.detach().await {
            warn!(err = %e, "control channel detach failed");
        }
        let reply = call_result?;

        let bytes = payload::decode(&reply, &self.decode_order)?;
        if bytes.is_empty() {
            return Err(RecordError::EmptyArtifact);
        }

        tokio::fs::create_dir_all(&cx.dir).await?;
        let path = cx.dir.join(&cx.name);
        tokio::fs::write(&path, &bytes).await?;

        // Verify the write landed before publishing anything.
        let written = tokio::fs::metadata(&path).await?.len();
        if written == 0 {
            return Err(RecordError::EmptyArtifact);
        }
        debug!(path = %path.display(), size = written, "provider artifact written");

        Ok(StopOutcome {
            path,
            size_bytes: written,
            is_dir: false,
            frame_count: None,
            confirmed_stable: true,
        })
    }
}
