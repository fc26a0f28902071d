// ipc/handlers/daemon.rs — Daemon lifecycle RPC handlers.

use crate::AppContext;
use anyhow::Result;
use serde_json::{json, Value};

/// `daemon.ping` — liveness check.
pub async fn ping(_params: Value, _ctx: &AppContext) -> Result<Value> {
    Ok(json!({
        "pong": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `daemon.status` — daemon-wide status document.
pub async fn status(_params: Value, ctx: &AppContext) -> Result<Value> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "daemonId": ctx.daemon_id,
        "uptimeSecs": ctx.started_at.elapsed().as_secs(),
        "targets": ctx.targets.count().await,
        "activeRecordings": ctx.recorder.active_count().await,
        "publishedArtifacts": ctx.artifacts.count().await,
        "rpcPort": ctx.config.port,
        "artifactPort": ctx.config.artifact_port,
    }))
}
