//! Durable store for switch state, history, rules and routing decisions
//!
//! The routing core treats the store as an at-least-once, eventually
//! durable sink. `MemoryStore` keeps everything in process; `FileStore`
//! writes JSON and JSON-lines files under one directory.

use crate::error::StoreError;
use crate::orchestrator::{RoutingSwitchState, SwitchHistoryEntry};
use crate::router::{RoutingDecision, RoutingRule};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Persistence collaborator
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load_switch_state(&self) -> Result<Option<RoutingSwitchState>, StoreError>;
    async fn save_switch_state(&self, state: &RoutingSwitchState) -> Result<(), StoreError>;
    async fn append_switch_history(&self, entry: &SwitchHistoryEntry) -> Result<(), StoreError>;
    /// Up to `limit` entries, most recent first
    async fn load_switch_history(&self, limit: usize)
    -> Result<Vec<SwitchHistoryEntry>, StoreError>;
    async fn save_decision(&self, decision: &RoutingDecision) -> Result<(), StoreError>;
    /// `None` when rules were never saved
    async fn load_rules(&self) -> Result<Option<Vec<RoutingRule>>, StoreError>;
    async fn save_rules(&self, rules: &[RoutingRule]) -> Result<(), StoreError>;
}

/// Run a store write with exponential backoff
///
/// Waits `base_delay * 2^n` between attempts (100ms, 200ms, ... by default).
pub async fn with_retry<F, Fut, T>(
    operation: &str,
    attempts: u32,
    base_delay: Duration,
    mut f: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < attempts => {
                let delay = base_delay * 2u32.saturating_pow(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// In-process store
///
/// `set_unavailable(true)` makes every write fail, which lets tests exercise
/// persistence failure handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    switch_state: Mutex<Option<RoutingSwitchState>>,
    history: Mutex<Vec<SwitchHistoryEntry>>,
    decisions: Mutex<Vec<RoutingDecision>>,
    rules: Mutex<Option<Vec<RoutingRule>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a switch state
    pub fn with_switch_state(state: RoutingSwitchState) -> Self {
        let store = Self::default();
        *store.switch_state.lock() = Some(state);
        store
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn decisions(&self) -> Vec<RoutingDecision> {
        self.decisions.lock().clone()
    }

    /// History in append order
    pub fn history(&self) -> Vec<SwitchHistoryEntry> {
        self.history.lock().clone()
    }

    pub fn switch_state(&self) -> Option<RoutingSwitchState> {
        self.switch_state.lock().clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load_switch_state(&self) -> Result<Option<RoutingSwitchState>, StoreError> {
        Ok(self.switch_state.lock().clone())
    }

    async fn save_switch_state(&self, state: &RoutingSwitchState) -> Result<(), StoreError> {
        self.check_available()?;
        *self.switch_state.lock() = Some(state.clone());
        Ok(())
    }

    async fn append_switch_history(&self, entry: &SwitchHistoryEntry) -> Result<(), StoreError> {
        self.check_available()?;
        self.history.lock().push(entry.clone());
        Ok(())
    }

    async fn load_switch_history(
        &self,
        limit: usize,
    ) -> Result<Vec<SwitchHistoryEntry>, StoreError> {
        Ok(self.history.lock().iter().rev().take(limit).cloned().collect())
    }

    async fn save_decision(&self, decision: &RoutingDecision) -> Result<(), StoreError> {
        self.check_available()?;
        self.decisions.lock().push(decision.clone());
        Ok(())
    }

    async fn load_rules(&self) -> Result<Option<Vec<RoutingRule>>, StoreError> {
        Ok(self.rules.lock().clone())
    }

    async fn save_rules(&self, rules: &[RoutingRule]) -> Result<(), StoreError> {
        self.check_available()?;
        *self.rules.lock() = Some(rules.to_vec());
        Ok(())
    }
}

const SWITCH_STATE_FILE: &str = "switch_state.json";
const SWITCH_HISTORY_FILE: &str = "switch_history.jsonl";
const DECISIONS_FILE: &str = "decisions.jsonl";
const RULES_FILE: &str = "rules.json";

/// File-backed store rooted at one directory
///
/// Whole-document files are replaced through a temporary file and rename;
/// history and decisions are appended as JSON lines.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| io_error(&dir, source))?;
        tracing::info!(path = %dir.display(), "File store opened");
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn read_document<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, StoreError> {
        let path = self.path(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(&path, source)),
        }
    }

    async fn write_document<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let path = self.path(file);
        let tmp = self.path(&format!("{file}.tmp"));

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|source| io_error(&tmp, source))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| io_error(&path, source))
    }

    async fn append_line<T: Serialize>(&self, file: &str, value: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        let path = self.path(file);

        let _guard = self.write_lock.lock().await;
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| io_error(&path, source))?;
        handle
            .write_all(&line)
            .await
            .map_err(|source| io_error(&path, source))?;
        handle.flush().await.map_err(|source| io_error(&path, source))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn load_switch_state(&self) -> Result<Option<RoutingSwitchState>, StoreError> {
        self.read_document(SWITCH_STATE_FILE).await
    }

    async fn save_switch_state(&self, state: &RoutingSwitchState) -> Result<(), StoreError> {
        self.write_document(SWITCH_STATE_FILE, state).await
    }

    async fn append_switch_history(&self, entry: &SwitchHistoryEntry) -> Result<(), StoreError> {
        self.append_line(SWITCH_HISTORY_FILE, entry).await
    }

    async fn load_switch_history(
        &self,
        limit: usize,
    ) -> Result<Vec<SwitchHistoryEntry>, StoreError> {
        let path = self.path(SWITCH_HISTORY_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&path, source)),
        };

        let mut entries = Vec::new();
        for (line_number, line) in content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str::<SwitchHistoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = line_number + 1,
                    error = %e,
                    "Skipping unreadable switch history line"
                ),
            }
        }
        Ok(entries.into_iter().rev().take(limit).collect())
    }

    async fn save_decision(&self, decision: &RoutingDecision) -> Result<(), StoreError> {
        self.append_line(DECISIONS_FILE, decision).await
    }

    async fn load_rules(&self) -> Result<Option<Vec<RoutingRule>>, StoreError> {
        self.read_document(RULES_FILE).await
    }

    async fn save_rules(&self, rules: &[RoutingRule]) -> Result<(), StoreError> {
        self.write_document(RULES_FILE, rules).await
    }
}
