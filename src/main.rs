use guildpulse::discord::{incoming_from_gateway, DiscordSource};
use guildpulse::ingest::IngestService;
use guildpulse::query::QueryEngine;
use guildpulse::server::handlers::AppState;
use guildpulse::server::rate_limit::RateLimiter;
use guildpulse::server::QueryServer;
use guildpulse::store::mapping::MappingStore;
use guildpulse::store::LogStore;
use guildpulse::{config::Config, Data, Error};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config);
    let discord_token = config.discord_token.clone();

    // Prepare storage before anything can write to it
    let logs = LogStore::new(&config.log_root, &config.archive_root);
    logs.initialize()?;
    let mappings = MappingStore::open(logs.root())?;

    let ingest = IngestService::new(logs.clone(), mappings.clone(), config.backfill_limit);

    let server = QueryServer::new(
        AppState {
            engine: QueryEngine::new(logs),
            mappings,
            default_parts: config.default_parts,
            max_parts: config.max_parts,
        },
        Arc::new(RateLimiter::new(config.rate_limit_max, config.rate_limit_window)),
        config.http_port,
    );

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            event_handler: |ctx, event, _framework, data| {
                Box::pin(event_handler(ctx, event, data))
            },
            ..Default::default()
        })
        .setup(|ctx, ready, _framework| {
            Box::pin(async move {
                info!("Logged in as {}!", ready.user.tag());
                ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));
                Ok(Data { ingest })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;
    let shard_manager = client.shard_manager.clone();

    let server_task = tokio::spawn(server.run());

    info!("Starting bot...");
    tokio::select! {
        result = client.start() => {
            if let Err(why) = result {
                error!("Client error: {:?}", why);
            }
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
            shard_manager.shutdown_all().await;
        }
    }

    Ok(())
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { .. } => {
            // Runs on every (re)connect; already stored messages are skipped.
            let ingest = data.ingest.clone();
            let source = DiscordSource::new(ctx.http.clone());
            tokio::spawn(async move {
                if let Err(e) = ingest.backfill(&source).await {
                    warn!("Backfill aborted: {}", e);
                }
            });
        }
        serenity::FullEvent::Message { new_message } => {
            if let Some(message) = incoming_from_gateway(ctx, new_message) {
                if let Err(e) = data.ingest.ingest_live(&message).await {
                    error!(
                        "Failed to store message {} in channel {}: {}",
                        message.id, message.channel_id, e
                    );
                }
            }
        }
        _ => {}
    }
    Ok(())
}
