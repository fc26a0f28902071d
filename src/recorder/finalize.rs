// SPDX-License-Identifier: MIT
//! Write-quiescence detection for asynchronously flushed artifacts.
//!
//! Recording backends flush at variable rates proportional to recording length,
//! so a fixed sleep is unreliable. [`wait_for_stable`] instead polls the file
//! size and declares the artifact finalized once the size has held steady (and
//! non-zero) for a configured number of consecutive polls. The wait never
//! blocks past the caller's bound — on expiry it reports the last observed
//! size with `stable: false` and lets the caller decide.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

/// Poll tuning for [`wait_for_stable`].
///
/// Normal mode favours latency (short interval, few samples). Aggressive mode
/// is for backends that flush in bursts with long gaps: it samples slower and
/// demands more consecutive agreement before trusting the size.
#[derive(Debug, Clone)]
pub struct FinalizeConfig {
    /// Poll interval in normal mode. Default: 250 ms.
    pub poll_interval: Duration,
    /// Consecutive unchanged (and non-zero) sizes required in normal mode.
    /// Default: 3
    pub required_stable_polls: u32,
    /// Poll interval in aggressive mode. Default: 500 ms.
    pub aggressive_poll_interval: Duration,
    /// Consecutive unchanged sizes required in aggressive mode. Default: 6
    pub aggressive_required_stable_polls: u32,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            required_stable_polls: 3,
            aggressive_poll_interval: Duration::from_millis(500),
            aggressive_required_stable_polls: 6,
        }
    }
}

impl FinalizeConfig {
    /// Create a config suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            required_stable_polls: 3,
            aggressive_poll_interval: Duration::from_millis(10),
            aggressive_required_stable_polls: 5,
        }
    }

    fn mode(&self, aggressive: bool) -> (Duration, u32) {
        if aggressive {
            (
                self.aggressive_poll_interval,
                self.aggressive_required_stable_polls,
            )
        } else {
            (self.poll_interval, self.required_stable_polls)
        }
    }
}

/// Outcome of a stability wait.
#[derive(Debug, Clone)]
pub struct StableWait {
    /// Last observed size in bytes (0 when the file never appeared).
    pub size_bytes: u64,
    /// Whether the consecutive-stable threshold was reached before the bound.
    pub stable: bool,
    /// Total polls performed.
    pub polls: u32,
    /// Wall time spent waiting.
    pub waited: Duration,
}

/// Poll `path` until its size holds steady, or `max_wait` elapses.
///
/// The consecutive-stable counter resets whenever the size changes (or the
/// file is missing/empty); success requires the counter to reach the
/// mode-specific threshold with a non-zero size.
pub async fn wait_for_stable(
    path: &Path,
    max_wait: Duration,
    aggressive: bool,
    config: &FinalizeConfig,
) -> StableWait {
    let (interval, required) = config.mode(aggressive);
    let started = tokio::time::Instant::now();
    let deadline = started + max_wait;

    let mut last_size: Option<u64> = None;
    let mut consecutive: u32 = 0;
    let mut polls: u32 = 0;

    loop {
        let size = tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        polls += 1;

        if size > 0 && last_size == Some(size) {
            consecutive += 1;
        } else {
            consecutive = 0;
        }
        last_size = Some(size);
        trace!(path = %path.display(), size, consecutive, "finalize poll");

        if consecutive >= required {
            debug!(path = %path.display(), size, polls, "artifact size stabilized");
            return StableWait {
                size_bytes: size,
                stable: true,
                polls,
                waited: started.elapsed(),
            };
        }

        // Never block past the caller's bound: if the next poll would land
        // beyond the deadline, report best-effort now.
        if tokio::time::Instant::now() + interval > deadline {
            debug!(
                path = %path.display(),
                size,
                polls,
                "stability not confirmed within bound"
            );
            return StableWait {
                size_bytes: size,
                stable: false,
                polls,
                waited: started.elapsed(),
            };
        }
        tokio::time::sleep(interval).await;
    }
}
