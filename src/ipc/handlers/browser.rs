// ipc/handlers/browser.rs — Browser target RPC handlers.
//
// Thin boundary over the target registry: connecting supplies the
// (targetId, ConnectionDescriptor, live handle) triple the recorder consumes.

use crate::AppContext;
use anyhow::Result;
use serde_json::{json, Value};

/// `browser.connect` — register a browser target.
///
/// Params:
/// - `endpoint`: string — the target's WebSocket endpoint
/// - `targetId`: optional string — caller-chosen id (default: generated)
pub async fn connect(params: Value, ctx: &AppContext) -> Result<Value> {
    let endpoint = params
        .get("endpoint")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("invalid params: endpoint required"))?;

    let generated;
    let target_id = match params.get("targetId").and_then(Value::as_str) {
        Some(id) => id,
        None => {
            generated = format!("target-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
            &generated
        }
    };

    // The context-recording capability is fixed here, at connection time —
    // the recorder only ever reads it.
    let record_context = ctx.config.recording.record_context;
    let video_dir = record_context.then(|| ctx.config.context_video_dir(target_id));
    let view = ctx
        .targets
        .connect(target_id, endpoint, record_context, video_dir)
        .await?;
    Ok(json!({ "target": view }))
}

/// `browser.disconnect` — forget a target. Any live recording keeps its
/// handle until stopped.
pub async fn disconnect(params: Value, ctx: &AppContext) -> Result<Value> {
    let target_id = params
        .get("targetId")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("invalid params: targetId required"))?;

    ctx.targets
        .disconnect(target_id)
        .await
        .map_err(|_| anyhow::anyhow!("NO_TARGET:{target_id}"))?;
    Ok(json!({ "disconnected": target_id }))
}

/// `browser.targets` — list connected targets.
pub async fn targets(_params: Value, ctx: &AppContext) -> Result<Value> {
    Ok(json!({ "targets": ctx.targets.list().await }))
}
