//! Append-only memory log
//!
//! Entries are namespaced JSON objects stamped with a UTC timestamp. The
//! file backend writes one JSON line per entry; readers never block writers.

use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// One remembered record: `{"ts": .., "ns": .., ...payload}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub ts: DateTime<Utc>,
    pub ns: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl MemoryEntry {
    pub fn new(ns: &str, mut payload: Map<String, Value>) -> Self {
        payload.remove("ts");
        payload.remove("ns");
        Self {
            ts: Utc::now(),
            ns: ns.to_string(),
            payload,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(Value::as_str)
    }
}

enum MemoryBackend {
    InMemory {
        entries: Arc<RwLock<Vec<MemoryEntry>>>,
    },
    JsonlFile {
        path: PathBuf,
        writer: Arc<Mutex<()>>,
    },
}

/// Shared across queries; cheap to clone.
#[derive(Clone)]
pub struct MemoryLog {
    backend: Arc<MemoryBackend>,
}

impl MemoryLog {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::InMemory {
                entries: Arc::new(RwLock::new(Vec::new())),
            }),
        }
    }

    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Arc::new(MemoryBackend::JsonlFile {
                path: path.into(),
                writer: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// File-backed when a path is configured, otherwise in-process.
    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::jsonl(p),
            None => Self::in_memory(),
        }
    }

    pub async fn append(&self, ns: &str, payload: Map<String, Value>) -> Result<()> {
        let entry = MemoryEntry::new(ns, payload);

        match self.backend.as_ref() {
            MemoryBackend::InMemory { entries } => {
                entries.write().await.push(entry);
            }
            MemoryBackend::JsonlFile { path, writer } => {
                let mut line = serde_json::to_string(&entry)?;
                line.push('\n');

                let _guard = writer.lock().await;
                let path = path.clone();
                tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                    let mut file = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)?;
                    // single write keeps each line whole under O_APPEND
                    file.write_all(line.as_bytes())
                })
                .await
                .map_err(|e| OrchestrationError::MemoryError(format!("append task failed: {}", e)))??;
            }
        }

        debug!(namespace = %ns, "Memory entry appended");
        Ok(())
    }

    /// Last `limit` entries of a namespace, oldest first.
    pub async fn recent(&self, ns: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let matching: Vec<MemoryEntry> = match self.backend.as_ref() {
            MemoryBackend::InMemory { entries } => entries
                .read()
                .await
                .iter()
                .filter(|e| e.ns == ns)
                .cloned()
                .collect(),
            MemoryBackend::JsonlFile { path, .. } => {
                let path = path.clone();
                let contents = tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
                    Ok(c) => Ok(c),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
                    Err(e) => Err(e),
                })
                .await
                .map_err(|e| OrchestrationError::MemoryError(format!("read task failed: {}", e)))??;

                let mut skipped = 0usize;
                let entries: Vec<MemoryEntry> = contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .filter_map(|l| match serde_json::from_str::<MemoryEntry>(l) {
                        Ok(entry) => Some(entry),
                        Err(_) => {
                            skipped += 1;
                            None
                        }
                    })
                    .filter(|e| e.ns == ns)
                    .collect();
                if skipped > 0 {
                    warn!(skipped, "Skipped unreadable memory lines");
                }
                entries
            }
        };

        let start = matching.len().saturating_sub(limit);
        Ok(matching[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(text: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".to_string(), json!("summary"));
        map.insert("text".to_string(), json!(text));
        map
    }

    #[tokio::test]
    async fn test_in_memory_recent_filters_namespace() {
        let log = MemoryLog::in_memory();
        for i in 0..5 {
            log.append("stat_agent", payload(&format!("s{}", i))).await.unwrap();
        }
        log.append("fin_agent", payload("f0")).await.unwrap();

        let recent = log.recent("stat_agent", 3).await.unwrap();
        let texts: Vec<_> = recent.iter().filter_map(|e| e.text()).collect();
        assert_eq!(texts, vec!["s2", "s3", "s4"]);
    }

    #[tokio::test]
    async fn test_jsonl_roundtrip_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory_store.jsonl");
        let log = MemoryLog::jsonl(&path);

        assert!(log.recent("stat_agent", 3).await.unwrap().is_empty());

        log.append("stat_agent", payload("first")).await.unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{not json\n")
            .unwrap();
        log.append("stat_agent", payload("second")).await.unwrap();

        let recent = log.recent("stat_agent", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].text(), Some("second"));

        let raw = std::fs::read_to_string(&path).unwrap();
        let first: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["ns"], "stat_agent");
        assert_eq!(first["type"], "summary");
        assert!(first["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let log = MemoryLog::jsonl(dir.path().join("log.jsonl"));

        let mut handles = Vec::new();
        for i in 0..20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append("fin_agent", payload(&"x".repeat(100 + i))).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(log.recent("fin_agent", 100).await.unwrap().len(), 20);
    }

    #[test]
    fn test_reserved_keys_are_not_duplicated() {
        let mut p = payload("t");
        p.insert("ns".to_string(), json!("spoofed"));
        let entry = MemoryEntry::new("stat_agent", p);
        assert_eq!(entry.ns, "stat_agent");
        assert!(!entry.payload.contains_key("ns"));
    }
}
