//! Serenity glue: history enumeration over the REST API and projection of
//! gateway messages into [`IncomingMessage`].

use crate::ingest::{ChannelInfo, GuildInfo, HistorySource, IncomingMessage, SourceError};
use async_trait::async_trait;
use serenity::builder::GetMessages;
use serenity::client::Context;
use serenity::http::{GuildPagination, Http};
use serenity::model::channel::{ChannelType, Message};
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::future::Future;
use std::sync::Arc;

/// Milliseconds between the Unix epoch and the first Discord snowflake.
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Largest page `GET /users/@me/guilds` returns.
const GUILD_PAGE_SIZE: u64 = 200;

pub struct DiscordSource {
    http: Arc<Http>,
}

impl DiscordSource {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HistorySource for DiscordSource {
    async fn guilds(&self) -> Result<Vec<GuildInfo>, SourceError> {
        let http = &self.http;
        let guilds = collect_pages(
            GUILD_PAGE_SIZE as usize,
            |g: &serenity::model::guild::GuildInfo| g.id,
            |after| async move {
                http.get_guilds(after.map(GuildPagination::After), Some(GUILD_PAGE_SIZE))
                    .await
            },
        )
        .await
        .map_err(|e| source_error(e, "guild list"))?;

        Ok(guilds
            .into_iter()
            .map(|g| GuildInfo {
                id: g.id.to_string(),
                name: g.name,
            })
            .collect())
    }

    async fn text_channels(&self, guild: &GuildInfo) -> Result<Vec<ChannelInfo>, SourceError> {
        let guild_id = parse_id(&guild.id).map(GuildId::new)?;
        let channels = guild_id
            .channels(&self.http)
            .await
            .map_err(|e| source_error(e, &guild.id))?;

        let mut text: Vec<_> = channels
            .into_values()
            .filter(|c| c.kind == ChannelType::Text)
            .collect();
        text.sort_by_key(|c| c.position);

        Ok(text
            .into_iter()
            .map(|c| ChannelInfo {
                id: c.id.to_string(),
                name: c.name,
            })
            .collect())
    }

    async fn recent_messages(
        &self,
        guild: &GuildInfo,
        channel: &ChannelInfo,
        limit: u8,
    ) -> Result<Vec<IncomingMessage>, SourceError> {
        let channel_id = parse_id(&channel.id).map(ChannelId::new)?;
        let messages = channel_id
            .messages(&self.http, GetMessages::new().limit(limit))
            .await
            .map_err(|e| source_error(e, &channel.id))?;

        Ok(messages
            .iter()
            .map(|m| project(m, &guild.id, &guild.name, &channel.name))
            .collect())
    }
}

/// Fetches pages keyed on the last item of the previous page until a page
/// comes back shorter than `page_size`.
async fn collect_pages<T, K, F, Fut, E>(
    page_size: usize,
    key: impl Fn(&T) -> K,
    mut fetch: F,
) -> Result<Vec<T>, E>
where
    F: FnMut(Option<K>) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let mut items = Vec::new();
    let mut after = None;
    loop {
        let page = fetch(after.take()).await?;
        let last_page = page.len() < page_size;
        after = page.last().map(&key);
        items.extend(page);
        if last_page || after.is_none() {
            return Ok(items);
        }
    }
}

/// Builds an [`IncomingMessage`] for a gateway message, resolving names from
/// the cache. Direct messages have no guild and yield `None`.
pub fn incoming_from_gateway(ctx: &Context, message: &Message) -> Option<IncomingMessage> {
    let guild_id = message.guild_id?;

    let (guild_name, channel_name) = match ctx.cache.guild(guild_id) {
        Some(guild) => (
            guild.name.clone(),
            guild
                .channels
                .get(&message.channel_id)
                .map(|c| c.name.clone())
                .or_else(|| {
                    guild
                        .threads
                        .iter()
                        .find(|t| t.id == message.channel_id)
                        .map(|t| t.name.clone())
                }),
        ),
        None => (guild_id.to_string(), None),
    };
    let channel_name = channel_name.unwrap_or_else(|| message.channel_id.to_string());

    Some(project(
        message,
        &guild_id.to_string(),
        &guild_name,
        &channel_name,
    ))
}

fn project(message: &Message, guild_id: &str, guild_name: &str, channel_name: &str) -> IncomingMessage {
    IncomingMessage {
        id: message.id.to_string(),
        author_tag: message.author.tag(),
        author_id: message.author.id.to_string(),
        author_is_bot: message.author.bot,
        content: message.content.clone(),
        timestamp_ms: snowflake_millis(message.id),
        channel_id: message.channel_id.to_string(),
        channel_name: channel_name.to_string(),
        guild_id: guild_id.to_string(),
        guild_name: guild_name.to_string(),
    }
}

/// Creation time of a message in epoch millis, taken from its snowflake.
pub fn snowflake_millis(id: MessageId) -> i64 {
    ((id.get() >> 22) + DISCORD_EPOCH_MS) as i64
}

fn parse_id(raw: &str) -> Result<u64, SourceError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| SourceError::Other(format!("invalid Discord id '{}'", raw)))
}

fn source_error(err: serenity::Error, target: &str) -> SourceError {
    if let serenity::Error::Http(http_err) = &err {
        if http_err.status_code().map(|s| s.as_u16()) == Some(403) {
            return SourceError::Forbidden(target.to_string());
        }
    }
    SourceError::Other(err.to_string())
}
