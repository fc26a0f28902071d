// SPDX-License-Identifier: MIT
//! Browser target registry.
//!
//! Supplies the recording subsystem with `(target_id, ConnectionDescriptor,
//! live target handle)` triples. Navigation and page interaction live
//! elsewhere; this module only manages connections and hands out control
//! channels.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::control::cdp::CdpChannel;
use crate::control::ControlChannel;
use crate::ipc::event::EventBroadcaster;
use crate::recorder::error::RecordError;

// ─── Connection descriptor ───────────────────────────────────────────────────

/// How a target was reached: endpoint address, parsed query parameters, and
/// capability flags fixed at connection time. Read-only after connect.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Full WebSocket endpoint as given by the caller.
    pub endpoint: String,
    /// Query parameters parsed once at connect time.
    pub query: HashMap<String, String>,
    /// A host-managed continuous recording was set up when this connection was
    /// established. Set by the connect path, never by the recorder.
    pub context_recording: bool,
}

impl ConnectionDescriptor {
    pub fn parse(endpoint: &str, context_recording: bool) -> Self {
        let query = endpoint
            .split_once('?')
            .map(|(_, q)| {
                q.split('&')
                    .filter(|p| !p.is_empty())
                    .map(|pair| match pair.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (pair.to_string(), String::new()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            endpoint: endpoint.to_string(),
            query,
            context_recording,
        }
    }

    /// Host portion of the endpoint (no scheme, port kept).
    pub fn host(&self) -> &str {
        let rest = self
            .endpoint
            .split_once("://")
            .map(|(_, r)| r)
            .unwrap_or(&self.endpoint);
        rest.split(['/', '?']).next().unwrap_or(rest)
    }

    /// Path portion of the endpoint (leading slash, no query).
    pub fn path(&self) -> &str {
        let rest = self
            .endpoint
            .split_once("://")
            .map(|(_, r)| r)
            .unwrap_or(&self.endpoint);
        let no_query = rest.split('?').next().unwrap_or(rest);
        match no_query.find('/') {
            Some(idx) => &no_query[idx..],
            None => "",
        }
    }

    pub fn has_query(&self, key: &str) -> bool {
        self.query.contains_key(key)
    }

    /// True when the query parameter is present with a truthy value.
    pub fn query_flag(&self, key: &str) -> bool {
        matches!(
            self.query.get(key).map(String::as_str),
            Some("true") | Some("1") | Some("yes")
        )
    }
}

// ─── Target handle ───────────────────────────────────────────────────────────

/// Live handle to an addressable browser page/tab.
#[async_trait]
pub trait TargetHandle: Send + Sync {
    fn target_id(&self) -> &str;

    /// Descriptor captured at connect time; `None` for a local/default session.
    fn descriptor(&self) -> Option<&ConnectionDescriptor>;

    fn connected_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Open a fresh control channel against this target.
    async fn open_channel(&self) -> Result<Arc<dyn ControlChannel>, RecordError>;

    /// Path of the host-managed continuous recording, if the host has flushed
    /// one yet. Only meaningful when the descriptor carries
    /// `context_recording`.
    async fn context_video_path(&self) -> Result<Option<PathBuf>, RecordError>;
}

/// Production target backed by a DevTools WebSocket endpoint.
pub struct CdpTarget {
    target_id: String,
    descriptor: ConnectionDescriptor,
    /// Directory the host writes its continuous recording into, when
    /// `context_recording` is set.
    video_dir: Option<PathBuf>,
    connected_at: DateTime<Utc>,
}

#[async_trait]
impl TargetHandle for CdpTarget {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        Some(&self.descriptor)
    }

    fn connected_at(&self) -> Option<DateTime<Utc>> {
        Some(self.connected_at)
    }

    async fn open_channel(&self) -> Result<Arc<dyn ControlChannel>, RecordError> {
        let channel = CdpChannel::connect(&self.descriptor.endpoint).await?;
        Ok(channel as Arc<dyn ControlChannel>)
    }

    async fn context_video_path(&self) -> Result<Option<PathBuf>, RecordError> {
        let Some(dir) = &self.video_dir else {
            return Ok(None);
        };
        newest_file(dir).await
    }
}

/// Newest regular file in `dir`, by modification time. The host names its
/// recording itself; the newest file is the one attached to this session.
async fn newest_file(dir: &std::path::Path) -> Result<Option<PathBuf>, RecordError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return Ok(None), // host has not created the directory yet
    };
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if newest.as_ref().map(|(m, _)| modified > *m).unwrap_or(true) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, p)| p))
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetView {
    pub target_id: String,
    pub endpoint: Option<String>,
    pub context_recording: bool,
    pub connected_at: String,
}

/// Registry of connected targets, keyed by target id.
pub struct TargetRegistry {
    targets: RwLock<HashMap<String, Arc<dyn TargetHandle>>>,
    /// Connection order, for resolving "the" target when the caller names none.
    order: RwLock<Vec<String>>,
    broadcaster: Arc<EventBroadcaster>,
}

impl TargetRegistry {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            broadcaster,
        }
    }

    /// Connect a CDP target. `record_context` reflects the daemon's startup
    /// configuration — when set, the host is assumed to maintain a continuous
    /// recording under `video_dir` for this connection.
    pub async fn connect(
        &self,
        target_id: &str,
        endpoint: &str,
        record_context: bool,
        video_dir: Option<PathBuf>,
    ) -> Result<TargetView, RecordError> {
        let descriptor = ConnectionDescriptor::parse(endpoint, record_context);
        let target = Arc::new(CdpTarget {
            target_id: target_id.to_string(),
            descriptor,
            video_dir: if record_context { video_dir } else { None },
            connected_at: Utc::now(),
        });
        let view = TargetView {
            target_id: target.target_id.clone(),
            endpoint: Some(target.descriptor.endpoint.clone()),
            context_recording: target.descriptor.context_recording,
            connected_at: target.connected_at.to_rfc3339(),
        };
        self.register(target).await;
        info!(id = %target_id, endpoint = %endpoint, "target connected");
        self.broadcaster.broadcast(
            "target.connected",
            serde_json::json!({ "targetId": target_id }),
        );
        Ok(view)
    }

    /// Register an arbitrary handle. Also the injection point for test doubles.
    pub async fn register(&self, target: Arc<dyn TargetHandle>) {
        let id = target.target_id().to_string();
        self.targets.write().await.insert(id.clone(), target);
        let mut order = self.order.write().await;
        order.retain(|existing| existing != &id);
        order.push(id);
    }

    pub async fn disconnect(&self, target_id: &str) -> Result<(), RecordError> {
        let removed = self.targets.write().await.remove(target_id);
        self.order.write().await.retain(|id| id != target_id);
        if removed.is_none() {
            return Err(RecordError::NoTarget);
        }
        info!(id = %target_id, "target disconnected");
        self.broadcaster.broadcast(
            "target.disconnected",
            serde_json::json!({ "targetId": target_id }),
        );
        Ok(())
    }

    /// Resolve the named target, or the most recently connected one when the
    /// caller names none.
    pub async fn resolve(&self, target_id: Option<&str>) -> Result<Arc<dyn TargetHandle>, RecordError> {
        let targets = self.targets.read().await;
        match target_id {
            Some(id) => targets.get(id).cloned().ok_or(RecordError::NoTarget),
            None => {
                let order = self.order.read().await;
                order
                    .last()
                    .and_then(|id| targets.get(id).cloned())
                    .ok_or(RecordError::NoTarget)
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.targets.read().await.len()
    }

    pub async fn list(&self) -> Vec<TargetView> {
        let targets = self.targets.read().await;
        let order = self.order.read().await;
        order
            .iter()
            .filter_map(|id| targets.get(id))
            .map(|t| TargetView {
                target_id: t.target_id().to_string(),
                endpoint: t.descriptor().map(|d| d.endpoint.clone()),
                context_recording: t.descriptor().map(|d| d.context_recording).unwrap_or(false),
                connected_at: t
                    .connected_at()
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
            })
            .collect()
    }
}
