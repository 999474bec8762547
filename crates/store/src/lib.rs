//! Durable, timestamp-ordered conversation snapshots.
//!
//! Every save writes a brand-new immutable JSON file named by a tag prefix
//! plus the current Unix-millisecond timestamp; nothing is ever overwritten.
//! Recovery reads the newest *ordinary* snapshot — pre-clear, quota-exceeded
//! and final-report files are never candidates — and always force-replaces
//! the persisted system prompt with the current one.

use chrono::Utc;
use quill_core::{Conversation, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Semantic tag of a snapshot, encoded as the filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTag {
    /// An ordinary end-of-turn snapshot; the only kind recovery considers.
    Conversation,
    /// Taken right before a `clear` wipes the live history.
    PreClear,
    /// Taken when the provider reports quota exhaustion, before exiting.
    QuotaExceeded,
    /// The ledger's end-of-session report (shares the directory, not the
    /// conversation format).
    FinalReport,
}

impl SnapshotTag {
    /// Filename prefix for this tag.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Conversation => "conversation-",
            Self::PreClear => "pre-clear-",
            Self::QuotaExceeded => "quota-exceeded-",
            Self::FinalReport => "final-report-",
        }
    }
}

/// File-based snapshot store for one session directory.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at `dir`. The directory itself is created
    /// lazily on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a full conversation under the given tag.
    ///
    /// Returns the path of the newly created file. Each (tag, timestamp)
    /// pair is a fresh file; on a same-millisecond collision the timestamp
    /// is bumped until the name is free.
    pub fn save(
        &self,
        conversation: &Conversation,
        tag: SnapshotTag,
    ) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let json = serde_json::to_string_pretty(conversation)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut millis = Utc::now().timestamp_millis();
        let path = loop {
            let candidate = self.dir.join(format!("{}{}.json", tag.prefix(), millis));
            if !candidate.exists() {
                break candidate;
            }
            millis += 1;
        };

        fs::write(&path, json).map_err(|e| StoreError::Io(e.to_string()))?;
        debug!(path = %path.display(), "Saved conversation snapshot");
        Ok(path)
    }

    /// Load the most recent ordinary snapshot, or start fresh.
    ///
    /// The persisted system prompt is never trusted: the first message of
    /// the returned conversation is always the *current* `system_prompt`.
    pub fn load_latest(&self, system_prompt: &str) -> Conversation {
        let Some(path) = self.latest_snapshot_path() else {
            debug!(dir = %self.dir.display(), "No snapshot to resume, starting fresh");
            return Conversation::with_system(system_prompt);
        };

        let mut conversation = match fs::read_to_string(&path)
            .map_err(|e| StoreError::Io(e.to_string()))
            .and_then(|content| {
                serde_json::from_str::<Conversation>(&content)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            }) {
            Ok(conv) => conv,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Snapshot unreadable, starting fresh");
                return Conversation::with_system(system_prompt);
            }
        };

        conversation.ensure_system(system_prompt);
        debug!(
            path = %path.display(),
            messages = conversation.len(),
            "Resumed conversation from snapshot"
        );
        conversation
    }

    /// Path for the ledger's end-of-session report.
    pub fn report_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}{}.json",
            SnapshotTag::FinalReport.prefix(),
            Utc::now().timestamp_millis()
        ))
    }

    /// Newest file carrying the ordinary tag, by modification time.
    fn latest_snapshot_path(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.dir).ok()?;

        let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(SnapshotTag::Conversation.prefix()))
            })
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, entry.path()))
            })
            .collect();

        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.into_iter().next().map(|(_, path)| path)
    }
}
