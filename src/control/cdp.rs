// SPDX-License-Identifier: MIT
//! DevTools-protocol control channel over WebSocket.
//!
//! One outbound connection per channel:
//! 1. `connect_async` to the target's WebSocket endpoint, split sink/stream
//! 2. an event pump task owns both halves: outbound commands arrive on an
//!    mpsc queue, inbound frames are matched to pending calls by id
//! 3. `Page.screencastFrame` events are acknowledged *inside the pump*, before
//!    the frame is handed to any consumer — an unacknowledged frame stalls the
//!    browser's frame production
//! 4. `detach` stops the pump and closes the socket
//!
//! Call replies are matched by monotonically increasing command ids; a reply
//! that never arrives resolves as `Timeout` at the call site.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use super::{CapturedFrame, ControlChannel, FrameSubscription};
use crate::recorder::error::RecordError;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type FrameSink = Arc<Mutex<Option<mpsc::UnboundedSender<CapturedFrame>>>>;

pub struct CdpChannel {
    endpoint: String,
    out_tx: mpsc::Sender<String>,
    pending: PendingMap,
    frame_sink: FrameSink,
    next_id: Arc<AtomicU64>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CdpChannel {
    /// Connect to a target's WebSocket endpoint and start the event pump.
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>, RecordError> {
        let (ws, _) = connect_async(endpoint)
            .await
            .map_err(|e| RecordError::channel(format!("connect {endpoint}: {e}")))?;
        debug!(endpoint = %endpoint, "control channel connected");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(128);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let frame_sink: FrameSink = Arc::new(Mutex::new(None));
        let next_id = Arc::new(AtomicU64::new(1));

        let pump_pending = pending.clone();
        let pump_frames = frame_sink.clone();
        let pump_ids = next_id.clone();
        let ack_tx = out_tx.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(t))) => t,
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!(err = %e, "control channel stream error");
                                break;
                            }
                        };
                        handle_inbound(&text, &pump_pending, &pump_frames, &pump_ids, &ack_tx).await;
                    }
                    out = out_rx.recv() => {
                        match out {
                            Some(text) => {
                                if sink.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            // Wake every caller still waiting on a reply.
            pump_pending.lock().await.clear();
            let _ = sink.send(Message::Close(None)).await;
        });

        Ok(Arc::new(Self {
            endpoint: endpoint.to_string(),
            out_tx,
            pending,
            frame_sink,
            next_id,
            pump: Mutex::new(Some(pump)),
        }))
    }
}

/// Route one inbound protocol message: call replies by id, frame events to the
/// sink. The frame ack is sent unconditionally and first — even when no
/// consumer is attached or the consumer has gone away, the source must not be
/// stalled.
async fn handle_inbound(
    text: &str,
    pending: &PendingMap,
    frames: &FrameSink,
    next_id: &Arc<AtomicU64>,
    ack_tx: &mpsc::Sender<String>,
) {
    let msg: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(err = %e, "unparseable control channel message");
            return;
        }
    };

    if let Some(id) = msg.get("id").and_then(Value::as_u64) {
        if let Some(tx) = pending.lock().await.remove(&id) {
            let _ = tx.send(msg);
        }
        return;
    }

    match msg.get("method").and_then(Value::as_str) {
        Some("Page.screencastFrame") => {
            let params = &msg["params"];
            let session_id = params.get("sessionId").cloned().unwrap_or(Value::Null);

            let ack = json!({
                "id": next_id.fetch_add(1, Ordering::Relaxed),
                "method": "Page.screencastFrameAck",
                "params": { "sessionId": session_id },
            })
            .to_string();
            if ack_tx.send(ack).await.is_err() {
                return;
            }

            let Some(data) = params.get("data").and_then(Value::as_str) else {
                warn!("screencast frame without data field");
                return;
            };
            let bytes = match BASE64.decode(data) {
                Ok(b) => b,
                Err(e) => {
                    warn!(err = %e, "screencast frame with undecodable data");
                    return;
                }
            };

            let guard = frames.lock().await;
            if let Some(sink) = guard.as_ref() {
                // The frame is already acked; a closed sink just drops it.
                // Gap detection is the consumer's job, via timestamps.
                let _ = sink.send(CapturedFrame {
                    bytes,
                    timestamp: Utc::now(),
                });
            }
        }
        Some(method) => trace!(method = %method, "ignoring control channel event"),
        None => {}
    }
}

#[async_trait]
impl ControlChannel for CdpChannel {
    async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RecordError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = json!({ "id": id, "method": method, "params": params }).to_string();
        if self.out_tx.send(request).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RecordError::channel(format!(
                "channel to {} is closed",
                self.endpoint
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                if let Some(err) = reply.get("error") {
                    return Err(RecordError::channel(format!("{method} failed: {err}")));
                }
                Ok(reply.get("result").cloned().unwrap_or(Value::Null))
            }
            Ok(Err(_)) => Err(RecordError::channel(format!(
                "channel closed while awaiting {method}"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RecordError::timeout(method.to_string(), timeout.as_secs()))
            }
        }
    }

    async fn start_frames(
        &self,
        sub: FrameSubscription,
        sink: mpsc::UnboundedSender<CapturedFrame>,
    ) -> Result<(), RecordError> {
        *self.frame_sink.lock().await = Some(sink);
        self.call(
            "Page.startScreencast",
            json!({
                "format": sub.format.as_str(),
                "quality": sub.quality,
                "maxWidth": sub.max_width,
                "maxHeight": sub.max_height,
                "everyNthFrame": 1,
            }),
            Duration::from_secs(10),
        )
        .await?;
        Ok(())
    }

    async fn stop_frames(&self) -> Result<(), RecordError> {
        let result = self
            .call("Page.stopScreencast", json!({}), Duration::from_secs(10))
            .await;
        *self.frame_sink.lock().await = None;
        result.map(|_| ())
    }

    async fn detach(&self) -> Result<(), RecordError> {
        *self.frame_sink.lock().await = None;
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
            debug!(endpoint = %self.endpoint, "control channel detached");
        }
        Ok(())
    }
}
