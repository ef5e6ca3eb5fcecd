use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::notifications::NotificationService;
use crate::domain::rule::Channel;
use crate::infra::{db::Db, queue::QueueClient, transport::ChannelTransports};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub attempt_id: Uuid,
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub channel: Channel,
}

const POLL_WAIT_SECONDS: i32 = 10;
const IDLE_SLEEP_MS: u64 = 200;
const ERROR_BACKOFF_MS: u64 = 1000;

enum ProcessingOutcome {
    Completed,
    RetryLater,
}

pub async fn run(
    db: Db,
    queue: QueueClient,
    transports: ChannelTransports,
    max_attempts: u32,
    backoff_base_ms: u64,
) -> Result<()> {
    info!("delivery worker started");
    loop {
        match queue.receive_delivery_job(POLL_WAIT_SECONDS).await {
            Ok(Some(message)) => {
                let outcome =
                    match process_job(&db, &transports, &message.job, max_attempts, backoff_base_ms)
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            error!(
                                error = ?err,
                                attempt_id = %message.job.attempt_id,
                                "failed to process delivery job"
                            );
                            let _ = mark_failed(
                                &db,
                                message.job.attempt_id,
                                0,
                                &format!("{:#}", err),
                            )
                            .await;
                            ProcessingOutcome::Completed
                        }
                    };

                if matches!(outcome, ProcessingOutcome::Completed) {
                    if let Err(err) = queue.delete_message(&message.receipt_handle).await {
                        warn!(error = ?err, "failed to delete queue message");
                    }
                }
            }
            Ok(None) => {
                tokio::time::sleep(Duration::from_millis(IDLE_SLEEP_MS)).await;
            }
            Err(err) => {
                warn!(error = ?err, "queue receive failed, backing off");
                tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
            }
        }
    }
}

async fn process_job(
    db: &Db,
    transports: &ChannelTransports,
    job: &DeliveryJob,
    max_attempts: u32,
    backoff_base_ms: u64,
) -> Result<ProcessingOutcome> {
    // Claim the attempt row; a duplicate queue delivery finds it already
    // settled and is dropped.
    let claimed = sqlx::query(
        "UPDATE delivery_attempts \
         SET status = 'delivering', updated_at = now() \
         WHERE id = $1 AND status = 'pending' \
         RETURNING id",
    )
    .bind(job.attempt_id)
    .fetch_optional(db.pool())
    .await?;

    if claimed.is_none() {
        let status_row =
            sqlx::query("SELECT status FROM delivery_attempts WHERE id = $1")
                .bind(job.attempt_id)
                .fetch_optional(db.pool())
                .await?;

        return match status_row {
            Some(row) => {
                let status: String = row.get("status");
                if status == "delivered" || status == "failed" {
                    Ok(ProcessingOutcome::Completed)
                } else {
                    Ok(ProcessingOutcome::RetryLater)
                }
            }
            None => {
                warn!(attempt_id = %job.attempt_id, "delivery attempt row missing, dropping");
                Ok(ProcessingOutcome::Completed)
            }
        };
    }

    let notification = NotificationService::new(db.clone())
        .get(job.notification_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("notification {} not found", job.notification_id))?;

    let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
        .bind(job.user_id)
        .fetch_optional(db.pool())
        .await?;
    let email = email.ok_or_else(|| anyhow::anyhow!("user {} not found", job.user_id))?;

    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match transports.send(job.channel, &email, &notification).await {
            Ok(()) => {
                sqlx::query(
                    "UPDATE delivery_attempts \
                     SET status = 'delivered', attempts = $2, updated_at = now() \
                     WHERE id = $1",
                )
                .bind(job.attempt_id)
                .bind(attempts as i32)
                .execute(db.pool())
                .await?;

                info!(
                    attempt_id = %job.attempt_id,
                    channel = job.channel.as_db(),
                    attempts = attempts,
                    "delivery succeeded"
                );
                return Ok(ProcessingOutcome::Completed);
            }
            Err(err) if attempts < max_attempts => {
                warn!(
                    error = ?err,
                    attempt_id = %job.attempt_id,
                    channel = job.channel.as_db(),
                    attempt = attempts,
                    "delivery attempt failed, backing off"
                );
                let backoff = backoff_base_ms.saturating_mul(1 << (attempts - 1));
                let jitter = rand::thread_rng().gen_range(0..=backoff_base_ms / 2);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
            Err(err) => {
                // Exhausted: this channel is recorded failed; other channels
                // and the inbox record are unaffected.
                mark_failed(db, job.attempt_id, attempts, &format!("{:#}", err)).await?;
                warn!(
                    error = ?err,
                    attempt_id = %job.attempt_id,
                    channel = job.channel.as_db(),
                    "delivery failed after all retries"
                );
                return Ok(ProcessingOutcome::Completed);
            }
        }
    }
}

async fn mark_failed(db: &Db, attempt_id: Uuid, attempts: u32, reason: &str) -> Result<()> {
    sqlx::query(
        "UPDATE delivery_attempts \
         SET status = 'failed', attempts = $2, last_error = $3, updated_at = now() \
         WHERE id = $1",
    )
    .bind(attempt_id)
    .bind(attempts as i32)
    .bind(reason)
    .execute(db.pool())
    .await?;

    Ok(())
}
