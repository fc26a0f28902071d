// ipc/handlers/recording.rs — Recording RPC handlers.
//
// Exposed methods:
// - `recording.start`  — begin recording the target
// - `recording.stop`   — finalize and publish the artifact
// - `recording.status` — live session status
// - `recording.get`    — look up a published artifact
//
// Every handler converts recording faults into a structured
// `{status: "error", error: {code, message, remediation?}}` result — raw
// transport errors never reach the caller. Only malformed params surface as
// RPC-level errors.

use std::time::Duration;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};

use crate::artifacts::ArtifactRecord;
use crate::control::FrameFormat;
use crate::recorder::error::RecordError;
use crate::recorder::{finalize, StartOptions};
use crate::AppContext;

/// `recording.start` — begin recording the (named or default) target.
///
/// Params:
/// - `targetId`: optional string
/// - `name`: optional string — logical artifact name (default: generated)
/// - `width`, `height`: optional integers > 0 — frame capture bounds
/// - `useFrameCapture`: optional bool — request the frame-capture backend
/// - `format`: optional `"jpeg"` | `"png"`
/// - `quality`: optional integer 1..=100
pub async fn start(params: Value, ctx: &AppContext) -> Result<Value> {
    let target_id = params.get("targetId").and_then(Value::as_str);
    let opts = StartOptions {
        name: params
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string),
        width: dimension(&params, "width")?,
        height: dimension(&params, "height")?,
        use_frame_capture: params
            .get("useFrameCapture")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        format: frame_format(&params)?,
        quality: quality(&params)?,
    };

    match ctx.recorder.start(target_id, opts).await {
        Ok(report) => Ok(json!({
            "status": "recording",
            "message": format!(
                "Recording started for target {} via the {} backend (artifact: {})",
                report.target_id, report.backend, report.name
            ),
        })),
        Err(e) => Ok(error_result(&e)),
    }
}

/// `recording.stop` — finalize the target's recording and publish it.
///
/// Params:
/// - `targetId`: optional string
/// - `returnArtifactRef`: optional bool (default: true)
/// - `returnInlinePayload`: optional bool (default: false)
/// - `forceInline`: optional bool (default: false) — inline even past the
///   configured size cap
/// - `maxWaitSeconds`: optional integer (default: 30)
pub async fn stop(params: Value, ctx: &AppContext) -> Result<Value> {
    let target_id = params.get("targetId").and_then(Value::as_str);
    let return_artifact_ref = params
        .get("returnArtifactRef")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let return_inline = params
        .get("returnInlinePayload")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let force_inline = params
        .get("forceInline")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let max_wait = params
        .get("maxWaitSeconds")
        .and_then(Value::as_u64)
        .unwrap_or(30);

    let report = match ctx
        .recorder
        .stop(target_id, Duration::from_secs(max_wait))
        .await
    {
        Ok(r) => r,
        Err(e) => return Ok(error_result(&e)),
    };

    let confirmation = if report.confirmed_stable {
        ""
    } else {
        ", size not confirmed stable"
    };
    let mut out = json!({
        "message": format!(
            "Recording saved as {} ({} bytes{confirmation})",
            report.record.name, report.record.size_bytes
        ),
    });

    if return_artifact_ref {
        let mut artifact = json!({
            "name": report.record.name,
            "sizeBytes": report.record.size_bytes,
            "url": artifact_url(ctx, &report.record.name),
            "isDirectory": report.record.is_dir,
            "sizeConfirmed": report.confirmed_stable,
        });
        if let Some(count) = report.frame_count {
            artifact["frameCount"] = json!(count);
        }
        out["artifact"] = artifact;
    }

    if return_inline {
        attach_inline_payload(ctx, &report.record, force_inline, &mut out).await;
    }

    Ok(out)
}

/// `recording.status` — live status for the (named or default) target.
pub async fn status(params: Value, ctx: &AppContext) -> Result<Value> {
    let target_id = params.get("targetId").and_then(Value::as_str);
    Ok(match ctx.recorder.status(target_id).await {
        Some(s) if s.state.is_live() => json!({
            "active": true,
            "targetId": s.target_id,
            "name": s.name,
            "backend": s.backend,
            "state": s.state,
            "elapsedSeconds": s.elapsed_seconds,
        }),
        Some(s) => json!({
            "active": false,
            "targetId": s.target_id,
            "name": s.name,
            "state": s.state,
        }),
        None => json!({ "active": false }),
    })
}

/// `recording.get` — look up a published artifact by logical name.
///
/// Params:
/// - `name`: string
/// - `returnContent`: optional bool (default: true) — include a locator
/// - `returnInlinePayload`: optional bool (default: false)
/// - `maxWaitSeconds`: optional integer (default: 10) — budget for settling a
///   freshly flushed file before reporting its size
pub async fn get(params: Value, ctx: &AppContext) -> Result<Value> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("invalid params: name required"))?;
    let return_content = params
        .get("returnContent")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let return_inline = params
        .get("returnInlinePayload")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let max_wait = params
        .get("maxWaitSeconds")
        .and_then(Value::as_u64)
        .unwrap_or(10);

    let record = match ctx.artifacts.resolve(name).await {
        Ok(r) => r,
        Err(e) => return Ok(error_result(&e)),
    };

    // A backend may still be flushing a file we resolved through the
    // directory scan; settle it with the shared stability primitive before
    // trusting the size.
    let mut size_bytes = record.size_bytes;
    let mut size_confirmed = true;
    if !record.is_dir && max_wait > 0 {
        let wait = finalize::wait_for_stable(
            &record.path,
            Duration::from_secs(max_wait),
            false,
            &ctx.config.recording.finalize_config(),
        )
        .await;
        if wait.size_bytes > 0 {
            size_bytes = wait.size_bytes;
        }
        size_confirmed = wait.stable;
    }

    let mut out = json!({
        "name": record.name,
        "sizeBytes": size_bytes,
        "sizeConfirmed": size_confirmed,
        "isDirectory": record.is_dir,
        "finalizedAt": record.finalized_at.to_rfc3339(),
    });
    if return_content {
        out["url"] = json!(artifact_url(ctx, &record.name));
    }
    if return_inline {
        attach_inline_payload(ctx, &record, false, &mut out).await;
    }
    Ok(out)
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn error_result(e: &RecordError) -> Value {
    json!({
        "status": "error",
        "message": e.to_string(),
        "error": e.to_error_object(),
    })
}

fn artifact_url(ctx: &AppContext, name: &str) -> String {
    format!(
        "http://{}:{}/artifacts/{}",
        ctx.config.bind_address, ctx.config.artifact_port, name
    )
}

/// Base64 the artifact into the response. Opt-in and expensive — a size cap
/// applies unless the caller forces it. Directory artifacts inline their
/// manifest.
async fn attach_inline_payload(
    ctx: &AppContext,
    record: &ArtifactRecord,
    force: bool,
    out: &mut Value,
) {
    let path = if record.is_dir {
        record.path.join(crate::recorder::frames::MANIFEST_FILENAME)
    } else {
        record.path.clone()
    };

    let cap = ctx.config.recording.max_inline_bytes;
    if !force && !record.is_dir && record.size_bytes > cap {
        out["inlineError"] = json!({
            "code": "too_large_for_inline",
            "message": format!(
                "artifact is {} bytes (inline cap {cap}); fetch {} or pass forceInline",
                record.size_bytes,
                artifact_url(ctx, &record.name)
            ),
        });
        return;
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            out["inlinePayloadBase64"] = json!(BASE64.encode(&bytes));
        }
        Err(e) => {
            out["inlineError"] = json!({
                "code": "internal",
                "message": format!("could not read artifact: {e}"),
            });
        }
    }
}

fn dimension(params: &Value, key: &str) -> Result<Option<u32>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_u64()
                .filter(|n| *n > 0 && *n <= u32::MAX as u64)
                .ok_or_else(|| anyhow::anyhow!("invalid params: {key} must be an integer > 0"))?;
            Ok(Some(n as u32))
        }
    }
}

fn frame_format(params: &Value) -> Result<Option<FrameFormat>> {
    match params.get("format").and_then(Value::as_str) {
        None => Ok(None),
        Some("jpeg") => Ok(Some(FrameFormat::Jpeg)),
        Some("png") => Ok(Some(FrameFormat::Png)),
        Some(other) => Err(anyhow::anyhow!(
            "invalid params: format must be \"jpeg\" or \"png\", got \"{other}\""
        )),
    }
}

fn quality(params: &Value) -> Result<Option<u8>> {
    match params.get("quality") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_u64()
                .filter(|n| (1..=100).contains(n))
                .ok_or_else(|| {
                    anyhow::anyhow!("invalid params: quality must be an integer in 1..=100")
                })?;
            Ok(Some(n as u8))
        }
    }
}
