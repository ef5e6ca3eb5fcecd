pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;
pub mod jobs;

use std::sync::Arc;

use crate::app::ingest::ObservationLedger;
use crate::infra::{cache::RedisCache, db::Db, queue::QueueClient};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: RedisCache,
    pub queue: QueueClient,
    /// Per-key previous-observation state shared by all ingest requests.
    pub observations: Arc<ObservationLedger>,
    pub feed_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub paseto_refresh_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub refresh_ttl_days: u64,
}
