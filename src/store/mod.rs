//! Durable per-channel message logs.
//!
//! Each (guild, channel) pair owns one JSON array at
//! `<root>/<guild_id>/<channel_id>/message_log.json`. Writes always replace the
//! whole file through a temp file in the same directory, so a concurrent
//! reader sees either the previous or the next complete log.

pub mod mapping;

use crate::model::MessageRecord;
use chrono::Local;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

pub const LOG_FILE_NAME: &str = "message_log.json";
const ARCHIVE_PREFIX: &str = "message_logs_";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid identifier '{0}'")]
    InvalidId(String),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

type ChannelKey = (String, String);

#[derive(Clone)]
pub struct LogStore {
    root: Arc<PathBuf>,
    archive_root: Arc<PathBuf>,
    locks: Arc<Mutex<HashMap<ChannelKey, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LogStore {
    pub fn new(root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
            archive_root: Arc::new(archive_root.into()),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Moves an existing log root aside to `<archive_root>/message_logs_<YYYYMMDD_HHmmss>`
    /// and creates a fresh, empty root. Returns the archive location, if any.
    pub fn initialize(&self) -> Result<Option<PathBuf>> {
        let mut archived = None;
        if self.root.exists() {
            fs::create_dir_all(self.archive_root.as_path())?;
            let target = self.archive_target();
            fs::rename(self.root.as_path(), &target)?;
            info!("Existing message logs moved to: {}", target.display());
            archived = Some(target);
        }
        fs::create_dir_all(self.root.as_path())?;
        debug!("LogStore: root ready at {}", self.root.display());
        Ok(archived)
    }

    fn archive_target(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let base = self.archive_root.join(format!("{ARCHIVE_PREFIX}{stamp}"));
        if !base.exists() {
            return base;
        }
        // Two initializations within the same second must not clobber each other.
        let mut n = 1u32;
        loop {
            let candidate = self
                .archive_root
                .join(format!("{ARCHIVE_PREFIX}{stamp}_{n}"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn log_path(&self, guild_id: &str, channel_id: &str) -> Result<PathBuf> {
        validate_id(guild_id)?;
        validate_id(channel_id)?;
        Ok(self.root.join(guild_id).join(channel_id).join(LOG_FILE_NAME))
    }

    pub fn exists(&self, guild_id: &str, channel_id: &str) -> Result<bool> {
        Ok(self.log_path(guild_id, channel_id)?.is_file())
    }

    /// Reads the full log. A missing file is an empty log.
    pub fn load(&self, guild_id: &str, channel_id: &str) -> Result<Vec<MessageRecord>> {
        let path = self.log_path(guild_id, channel_id)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    /// Replaces the full log with `messages`.
    pub fn save(&self, guild_id: &str, channel_id: &str, messages: &[MessageRecord]) -> Result<()> {
        let path = self.log_path(guild_id, channel_id)?;
        write_json_atomic(&path, &messages)?;
        debug!(
            "LogStore: wrote {} messages for {}/{}",
            messages.len(),
            guild_id,
            channel_id
        );
        Ok(())
    }

    /// Appends `records` to a channel log under that channel's lock, skipping
    /// records whose message id is already stored. The log file is created even
    /// when nothing is appended. Returns the number of records appended.
    pub async fn append(
        &self,
        guild_id: &str,
        channel_id: &str,
        records: Vec<MessageRecord>,
    ) -> Result<usize> {
        validate_id(guild_id)?;
        validate_id(channel_id)?;

        let lock = self.channel_lock(guild_id, channel_id);
        let _guard = lock.lock().await;

        let guild_id = guild_id.to_string();
        let channel_id = channel_id.to_string();
        self.run_blocking(move |store| {
            let existed = store.exists(&guild_id, &channel_id)?;
            let mut messages = store.load(&guild_id, &channel_id)?;
            let added = merge_records(&mut messages, records);
            if added > 0 || !existed {
                store.save(&guild_id, &channel_id, &messages)?;
            }
            Ok(added)
        })
        .await
    }

    /// Runs blocking filesystem work off the async executor.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&LogStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    fn channel_lock(&self, guild_id: &str, channel_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((guild_id.to_string(), channel_id.to_string()))
            .or_default()
            .clone()
    }
}

/// Appends records not yet present (by message id). Records without an id are
/// always appended.
fn merge_records(messages: &mut Vec<MessageRecord>, records: Vec<MessageRecord>) -> usize {
    let mut seen: HashSet<String> = messages
        .iter()
        .filter_map(|m| m.message_id.clone())
        .collect();

    let mut added = 0;
    for record in records {
        if let Some(id) = &record.message_id {
            if !seen.insert(id.clone()) {
                continue;
            }
        }
        messages.push(record);
        added += 1;
    }
    added
}

/// Ids become directory names, so each one must be a single plain path segment.
pub fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Serializes `value` with four-space indentation and atomically replaces `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::InvalidId(path.display().to_string()))?;
    fs::create_dir_all(parent)?;

    let mut payload = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut payload, formatter);
    value.serialize(&mut ser)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(&payload)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
