use anyhow::Result;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::app::digest::DigestService;
use crate::infra::{db::Db, queue::QueueClient};

/// Periodic digest flush. The drain is a single delete-and-return, so
/// overlapping or repeated runs for the same window are harmless.
pub async fn run(db: Db, queue: QueueClient, interval_seconds: u64) -> Result<()> {
    info!("digest flusher started");
    let digest = DigestService::new(db, queue);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));

    loop {
        ticker.tick().await;
        match digest.flush_due(OffsetDateTime::now_utc()).await {
            Ok(0) => {}
            Ok(count) => info!(count = count, "flushed digest summaries"),
            Err(err) => error!(error = ?err, "digest flush failed"),
        }
    }
}
