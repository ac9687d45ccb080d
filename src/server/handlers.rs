//! HTTP route handlers for the query API.

use super::error::ApiError;
use crate::model::Bucket;
use crate::query::{parse_instant, parse_parts, QueryEngine};
use crate::store::mapping::{ChannelMapping, GuildMapping, MappingStore};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: QueryEngine,
    pub mappings: MappingStore,
    pub default_parts: usize,
    pub max_parts: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagesParams {
    pub guild: Option<String>,
    pub channel: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub parts: Option<String>,
}

/// Handle GET /messages
///
/// Buckets a channel's messages between `start` and `end` into `parts` windows.
pub async fn handle_messages(
    State(state): State<AppState>,
    Query(params): Query<MessagesParams>,
) -> Result<Json<Vec<Bucket>>, ApiError> {
    let guild = params.guild.as_deref().filter(|s| !s.is_empty());
    let channel = params.channel.as_deref().filter(|s| !s.is_empty());
    let (Some(guild), Some(channel)) = (guild, channel) else {
        return Err(ApiError::BadRequest("Guild and Channel are required"));
    };

    let start = params.start.as_deref().and_then(parse_instant);
    let end = params.end.as_deref().and_then(parse_instant);
    let (Some(start), Some(end)) = (start, end) else {
        return Err(ApiError::BadRequest("Invalid date format"));
    };

    let Some(parts) = parse_parts(params.parts.as_deref(), state.default_parts, state.max_parts)
    else {
        return Err(ApiError::BadRequest("Too many parts requested"));
    };
    let buckets = state.engine.query(guild, channel, start, end, parts).await?;
    Ok(Json(buckets))
}

/// Handle GET /mappings/guilds
pub async fn handle_guild_mapping(State(state): State<AppState>) -> Json<GuildMapping> {
    Json(state.mappings.guilds())
}

/// Handle GET /mappings/channels
pub async fn handle_channel_mapping(State(state): State<AppState>) -> Json<ChannelMapping> {
    Json(state.mappings.channels())
}

/// Handle GET /-/healthy
pub async fn handle_healthy() -> &'static str {
    "OK"
}
