use crate::model::MessageRecord;
use crate::store::mapping::MappingStore;
use crate::store::{LogStore, StoreError};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Discord never returns more than 100 messages per history request.
pub const MAX_BACKFILL_LIMIT: u8 = 100;

#[derive(Debug, Clone)]
pub struct GuildInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

/// A message as delivered by the chat source, before projection into a
/// [`MessageRecord`].
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub author_tag: String,
    pub author_id: String,
    pub author_is_bot: bool,
    pub content: String,
    pub timestamp_ms: i64,
    pub channel_id: String,
    pub channel_name: String,
    pub guild_id: String,
    pub guild_name: String,
}

impl IncomingMessage {
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            author: self.author_tag.clone(),
            author_id: self.author_id.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp_ms,
            channel: self.channel_name.clone(),
            channel_id: self.channel_id.clone(),
            guild: self.guild_name.clone(),
            guild_id: self.guild_id.clone(),
            message_id: Some(self.id.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("missing access to channel {0}")]
    Forbidden(String),
    #[error("source error: {0}")]
    Other(String),
}

/// Startup enumeration and bounded history fetch from the chat source.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn guilds(&self) -> Result<Vec<GuildInfo>, SourceError>;

    async fn text_channels(&self, guild: &GuildInfo) -> Result<Vec<ChannelInfo>, SourceError>;

    /// Most recent messages of a channel, in any order.
    async fn recent_messages(
        &self,
        guild: &GuildInfo,
        channel: &ChannelInfo,
        limit: u8,
    ) -> Result<Vec<IncomingMessage>, SourceError>;
}

#[derive(Debug, Error)]
enum ChannelBackfillError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub channels_scanned: usize,
    pub channels_skipped: usize,
    pub records_stored: usize,
}

#[derive(Clone)]
pub struct IngestService {
    logs: LogStore,
    mappings: MappingStore,
    backfill_limit: u8,
}

impl IngestService {
    pub fn new(logs: LogStore, mappings: MappingStore, backfill_limit: u8) -> Self {
        Self {
            logs,
            mappings,
            backfill_limit: backfill_limit.clamp(1, MAX_BACKFILL_LIMIT),
        }
    }

    /// Stores one live message. Mappings are refreshed for every event; bot
    /// messages are not stored. Returns whether a record was appended.
    pub async fn ingest_live(&self, message: &IncomingMessage) -> Result<bool, StoreError> {
        self.refresh_mappings(message).await;

        if message.author_is_bot {
            return Ok(false);
        }

        let added = self
            .logs
            .append(
                &message.guild_id,
                &message.channel_id,
                vec![message.to_record()],
            )
            .await?;
        debug!(
            "Ingest: live message {} in {}/{} (stored: {})",
            message.id,
            message.guild_id,
            message.channel_id,
            added > 0
        );
        Ok(added > 0)
    }

    async fn refresh_mappings(&self, message: &IncomingMessage) {
        if let Err(e) = self
            .mappings
            .observe_guild(&message.guild_id, &message.guild_name)
            .await
        {
            error!("Failed to update guild mapping {}: {}", message.guild_id, e);
        }
        if let Err(e) = self
            .mappings
            .observe_channel(
                &message.channel_id,
                &message.channel_name,
                &message.guild_id,
                &message.guild_name,
            )
            .await
        {
            error!(
                "Failed to update channel mapping {}: {}",
                message.channel_id, e
            );
        }
    }

    /// Pulls recent history for every text channel of every guild. Failures are
    /// contained to the channel they happen in.
    pub async fn backfill(&self, source: &dyn HistorySource) -> Result<BackfillReport, SourceError> {
        let mut report = BackfillReport::default();

        for guild in source.guilds().await? {
            if let Err(e) = self.mappings.observe_guild(&guild.id, &guild.name).await {
                error!("Failed to update guild mapping {}: {}", guild.id, e);
            }

            let channels = match source.text_channels(&guild).await {
                Ok(channels) => channels,
                Err(e) => {
                    warn!("Skipping guild {} ({}): {}", guild.name, guild.id, e);
                    continue;
                }
            };

            for channel in channels {
                if let Err(e) = self
                    .mappings
                    .observe_channel(&channel.id, &channel.name, &guild.id, &guild.name)
                    .await
                {
                    error!("Failed to update channel mapping {}: {}", channel.id, e);
                }

                match self.backfill_channel(source, &guild, &channel).await {
                    Ok(stored) => {
                        report.channels_scanned += 1;
                        report.records_stored += stored;
                    }
                    Err(ChannelBackfillError::Source(SourceError::Forbidden(_))) => {
                        warn!("Bot does not have access to the channel: {}", channel.name);
                        report.channels_skipped += 1;
                    }
                    Err(e) => {
                        error!(
                            "Backfill failed for channel {} ({}): {}",
                            channel.name, channel.id, e
                        );
                        report.channels_skipped += 1;
                    }
                }
            }
        }

        info!(
            "Backfill complete: {} channels scanned, {} skipped, {} messages stored",
            report.channels_scanned, report.channels_skipped, report.records_stored
        );
        Ok(report)
    }

    async fn backfill_channel(
        &self,
        source: &dyn HistorySource,
        guild: &GuildInfo,
        channel: &ChannelInfo,
    ) -> Result<usize, ChannelBackfillError> {
        let mut fetched = source
            .recent_messages(guild, channel, self.backfill_limit)
            .await?;
        fetched.retain(|m| !m.author_is_bot);
        fetched.sort_by_key(|m| m.timestamp_ms);

        let records = fetched.iter().map(IncomingMessage::to_record).collect();
        let stored = self.logs.append(&guild.id, &channel.id, records).await?;
        debug!(
            "Backfill: {} new messages for {}/{}",
            stored, guild.id, channel.id
        );
        Ok(stored)
    }
}
