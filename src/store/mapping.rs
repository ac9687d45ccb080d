use super::{write_json_atomic, Result};
use crate::model::ChannelEntry;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub type GuildMapping = BTreeMap<String, String>;
pub type ChannelMapping = BTreeMap<String, ChannelEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Guild,
    Channel,
}

impl MappingKind {
    pub fn file_name(self) -> &'static str {
        match self {
            MappingKind::Guild => "guild_mapping.json",
            MappingKind::Channel => "channel_mapping.json",
        }
    }
}

#[derive(Default)]
struct Mappings {
    guilds: GuildMapping,
    channels: ChannelMapping,
}

/// Guild and channel name lookups, held in memory and written through to
/// `guild_mapping.json` / `channel_mapping.json` on every observation.
#[derive(Clone)]
pub struct MappingStore {
    dir: Arc<PathBuf>,
    inner: Arc<Mutex<Mappings>>,
}

impl MappingStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mappings = Mappings {
            guilds: load_mapping(&dir, MappingKind::Guild)?,
            channels: load_mapping(&dir, MappingKind::Channel)?,
        };
        debug!(
            "MappingStore: loaded {} guilds and {} channels",
            mappings.guilds.len(),
            mappings.channels.len()
        );
        Ok(Self {
            dir: Arc::new(dir),
            inner: Arc::new(Mutex::new(mappings)),
        })
    }

    pub fn path(&self, kind: MappingKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub async fn observe_guild(&self, guild_id: &str, guild_name: &str) -> Result<()> {
        let (guild_id, guild_name) = (guild_id.to_string(), guild_name.to_string());
        self.run_blocking(move |store| store.record_guild(guild_id, guild_name))
            .await
    }

    pub async fn observe_channel(
        &self,
        channel_id: &str,
        channel_name: &str,
        guild_id: &str,
        guild_name: &str,
    ) -> Result<()> {
        let channel_id = channel_id.to_string();
        let entry = ChannelEntry {
            channel_name: channel_name.to_string(),
            guild_id: guild_id.to_string(),
            guild_name: guild_name.to_string(),
        };
        self.run_blocking(move |store| store.record_channel(channel_id, entry))
            .await
    }

    /// Runs the locked write-through off the async executor.
    async fn run_blocking<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&MappingStore) -> Result<()> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    fn record_guild(&self, guild_id: String, guild_name: String) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.guilds.insert(guild_id, guild_name);
        save_mapping(&self.dir, MappingKind::Guild, &inner.guilds)
    }

    fn record_channel(&self, channel_id: String, entry: ChannelEntry) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.channels.insert(channel_id, entry);
        save_mapping(&self.dir, MappingKind::Channel, &inner.channels)
    }

    pub fn guilds(&self) -> GuildMapping {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .guilds
            .clone()
    }

    pub fn channels(&self) -> ChannelMapping {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .channels
            .clone()
    }
}

/// Reads one mapping document. A missing file is an empty mapping.
pub fn load_mapping<T: DeserializeOwned + Default>(dir: &Path, kind: MappingKind) -> Result<T> {
    match fs::read_to_string(dir.join(kind.file_name())) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

pub fn save_mapping<T: serde::Serialize>(dir: &Path, kind: MappingKind, mapping: &T) -> Result<()> {
    write_json_atomic(&dir.join(kind.file_name()), mapping)
}
