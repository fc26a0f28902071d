// SPDX-License-Identifier: MIT
//! In-process artifact registry.
//!
//! Maps logical artifact names to absolute paths for everything produced
//! during this process's lifetime. Entries are published only after
//! finalization confirmed the bytes immutable (or the producer explicitly
//! bypassed the wait), so readers never need to coordinate with writers.
//! Cleanup is external; nothing here deletes files.

pub mod server;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::recorder::error::RecordError;

/// A published, immutable artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub finalized_at: DateTime<Utc>,
    /// Frame-capture artifacts are directories; everything else is a file.
    pub is_dir: bool,
}

pub struct ArtifactStore {
    /// Output root all session-scoped artifact directories live under.
    root: PathBuf,
    records: RwLock<HashMap<String, ArtifactRecord>>,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a finalized artifact under its logical name.
    ///
    /// Names are caller-chosen and assumed unique per session; a repeated name
    /// replaces the registry entry (the file behind the old entry is never
    /// touched).
    pub async fn publish(&self, record: ArtifactRecord) {
        let mut records = self.records.write().await;
        if records.contains_key(&record.name) {
            warn!(name = %record.name, "artifact name republished — replacing registry entry");
        }
        info!(
            name = %record.name,
            path = %record.path.display(),
            size = record.size_bytes,
            "artifact published"
        );
        records.insert(record.name.clone(), record);
    }

    /// Resolve a logical name to a record.
    ///
    /// Checks the in-memory map first; on miss, scans output-root
    /// subdirectories newest-first for an exact filename match, then for any
    /// file with the expected extension (backends may assign their own
    /// filenames). `name` may address a file inside a directory artifact as
    /// `{artifact}/{file}`. Traversal segments are rejected before any
    /// filesystem access.
    pub async fn resolve(&self, name: &str) -> Result<ArtifactRecord, RecordError> {
        validate_name(name)?;

        let (base, sub) = match name.split_once('/') {
            Some((base, sub)) => (base, Some(sub)),
            None => (name, None),
        };

        let base_record = match self.records.read().await.get(base) {
            Some(r) => r.clone(),
            None => match self.scan(base) {
                Some(r) => r,
                None => {
                    return Err(RecordError::NotFound {
                        name: name.to_string(),
                        listing: self.debug_listing().await,
                    })
                }
            },
        };

        match sub {
            None => Ok(base_record),
            Some(rel) => {
                if !base_record.is_dir {
                    return Err(RecordError::NotFound {
                        name: name.to_string(),
                        listing: self.debug_listing().await,
                    });
                }
                let path = base_record.path.join(rel);
                let meta = tokio::fs::metadata(&path)
                    .await
                    .map_err(|_| RecordError::NotFound {
                        name: name.to_string(),
                        listing: format!("directory artifact: {}", base_record.path.display()),
                    })?;
                Ok(ArtifactRecord {
                    name: name.to_string(),
                    path,
                    size_bytes: meta.len(),
                    finalized_at: base_record.finalized_at,
                    is_dir: false,
                })
            }
        }
    }

    /// Newest-first scan of the output root for artifacts published under a
    /// backend-assigned name.
    fn scan(&self, name: &str) -> Option<ArtifactRecord> {
        let dirs = self.scan_dirs();

        // Pass 1: exact filename match.
        for dir in &dirs {
            let candidate = dir.join(name);
            if let Ok(meta) = std::fs::metadata(&candidate) {
                if meta.is_file() {
                    return Some(synthetic_record(name, candidate, &meta));
                }
            }
        }

        // Pass 2: extension match — the backend assigned its own filename.
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("webm")
            .to_ascii_lowercase();
        for dir in &dirs {
            let Ok(read_dir) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = read_dir
                .flatten()
                .filter_map(|e| {
                    let path = e.path();
                    let meta = e.metadata().ok()?;
                    if !meta.is_file() {
                        return None;
                    }
                    let file_ext = path.extension().and_then(|x| x.to_str())?;
                    if !file_ext.eq_ignore_ascii_case(&ext) {
                        return None;
                    }
                    Some((meta.modified().ok()?, path))
                })
                .collect();
            candidates.sort_by(|a, b| b.0.cmp(&a.0));
            if let Some((_, path)) = candidates.into_iter().next() {
                let meta = std::fs::metadata(&path).ok()?;
                return Some(synthetic_record(name, path, &meta));
            }
        }
        None
    }

    /// Output-root subdirectories, newest-first, the root itself last.
    fn scan_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        collect_dirs(&self.root, 2, &mut dirs);
        dirs.sort_by(|a, b| b.0.cmp(&a.0));
        let mut out: Vec<PathBuf> = dirs.into_iter().map(|(_, p)| p).collect();
        out.push(self.root.clone());
        out
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Human-readable listing of known names and scanned directories, shown in
    /// `NotFound` messages.
    pub async fn debug_listing(&self) -> String {
        let records = self.records.read().await;
        let mut names: Vec<&str> = records.keys().map(String::as_str).collect();
        names.sort_unstable();
        let dirs: Vec<String> = self
            .scan_dirs()
            .iter()
            .map(|d| d.display().to_string())
            .collect();
        format!(
            "known artifacts: [{}]; searched directories: [{}]",
            names.join(", "),
            dirs.join(", ")
        )
    }
}

fn collect_dirs(root: &Path, depth: u32, out: &mut Vec<(std::time::SystemTime, PathBuf)>) {
    if depth == 0 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            out.push((modified, entry.path()));
            collect_dirs(&entry.path(), depth - 1, out);
        }
    }
}

fn synthetic_record(name: &str, path: PathBuf, meta: &std::fs::Metadata) -> ArtifactRecord {
    ArtifactRecord {
        name: name.to_string(),
        path,
        size_bytes: meta.len(),
        finalized_at: meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now()),
        is_dir: false,
    }
}

/// Reject traversal and malformed names before touching the filesystem.
pub fn validate_name(name: &str) -> Result<(), RecordError> {
    if name.is_empty() || name.starts_with('/') || name.contains('\\') || name.contains('\0') {
        return Err(RecordError::TraversalAttempt);
    }
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(RecordError::TraversalAttempt);
        }
    }
    Ok(())
}

/// Shared handle type used across handlers and the delivery server.
pub type SharedArtifactStore = Arc<ArtifactStore>;
