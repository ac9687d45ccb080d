pub mod config;
pub mod discord;
pub mod ingest;
pub mod model;
pub mod query;
pub mod server;
pub mod store;

/// Custom data passed to all event handlers
pub struct Data {
    pub ingest: ingest::IngestService,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
