use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::app::dispatcher::enqueue_delivery;
use crate::app::evaluator::TriggeredRule;
use crate::app::notifications::{NewNotification, NotificationService};
use crate::app::preferences::PreferencesService;
use crate::domain::notification::{NotificationKind, Priority};
use crate::domain::rule::Channel;
use crate::infra::db::Db;
use crate::infra::queue::QueueClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestWindow {
    Daily,
    Weekly,
}

impl DigestWindow {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Daily => Duration::hours(24),
            Self::Weekly => Duration::days(7),
        }
    }

    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Daily => NotificationKind::DailyDigest,
            Self::Weekly => NotificationKind::WeeklyReport,
        }
    }
}

/// One pending entry in a user's digest bucket.
#[derive(Debug, Clone)]
pub struct DigestEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub rule_id: Uuid,
    pub window: DigestWindow,
    pub material_type: String,
    pub region: String,
    pub price: f64,
    pub previous_price: f64,
    pub change_percent: Option<f64>,
    pub created_at: OffsetDateTime,
    pub due_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct DigestService {
    db: Db,
    queue: QueueClient,
}

impl DigestService {
    pub fn new(db: Db, queue: QueueClient) -> Self {
        Self { db, queue }
    }

    /// Add a triggered event to the (user, window) bucket. The bucket's due
    /// time is fixed by its first event (first event time + window), so a
    /// user gets at most one summary per rolling window.
    pub async fn accumulate(
        &self,
        trigger: &TriggeredRule,
        window: DigestWindow,
        now: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO digest_events \
             (id, user_id, rule_id, window_kind, material_type, region, price, \
              previous_price, change_percent, due_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, \
                     COALESCE((SELECT MIN(due_at) FROM digest_events \
                               WHERE user_id = $2 AND window_kind = $4), $10))",
        )
        .bind(Uuid::new_v4())
        .bind(trigger.rule.user_id)
        .bind(trigger.rule.id)
        .bind(window.as_db())
        .bind(&trigger.rule.material_type)
        .bind(&trigger.region)
        .bind(trigger.price)
        .bind(trigger.previous_price)
        .bind(trigger.change_percent)
        .bind(now + window.duration())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Atomically drain every event whose bucket is due. Delete-and-return in
    /// one statement, so a second flusher run for the same window finds an
    /// empty bucket.
    pub async fn drain_due(&self, now: OffsetDateTime) -> Result<Vec<DigestEvent>> {
        let rows = sqlx::query(
            "DELETE FROM digest_events \
             WHERE due_at <= $1 \
             RETURNING id, user_id, rule_id, window_kind, material_type, region, price, \
                       previous_price, change_percent, created_at, due_at",
        )
        .bind(now)
        .fetch_all(self.db.pool())
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match digest_event_from_row(&row) {
                Ok(event) => events.push(event),
                Err(err) => {
                    let id: Uuid = row.get("id");
                    tracing::warn!(error = ?err, event_id = %id, "dropping malformed digest event");
                }
            }
        }
        Ok(events)
    }

    /// Drain due buckets and emit one summary notification per (user,
    /// window). Returns the number of summaries produced.
    pub async fn flush_due(&self, now: OffsetDateTime) -> Result<usize> {
        let events = self.drain_due(now).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut buckets: HashMap<(Uuid, DigestWindow), Vec<DigestEvent>> = HashMap::new();
        for event in events {
            buckets
                .entry((event.user_id, event.window))
                .or_default()
                .push(event);
        }

        let notifications = NotificationService::new(self.db.clone());
        let preferences = PreferencesService::new(self.db.clone());

        let mut flushed = 0;
        for ((user_id, window), bucket) in buckets {
            let summary = build_summary(user_id, window, &bucket);
            let notification = match notifications.insert(summary).await {
                Ok(notification) => notification,
                Err(err) => {
                    tracing::error!(error = ?err, user_id = %user_id, "failed to insert digest summary");
                    continue;
                }
            };
            flushed += 1;

            let prefs = match preferences.get_or_default(user_id).await {
                Ok(prefs) => prefs,
                Err(err) => {
                    tracing::error!(error = ?err, user_id = %user_id, "failed to load preferences for digest");
                    continue;
                }
            };

            let opted_in = match window {
                DigestWindow::Daily => prefs.daily_digest_enabled,
                DigestWindow::Weekly => prefs.weekly_report_enabled,
            };
            if opted_in && prefs.channel_enabled(Channel::Email) {
                if let Err(err) =
                    enqueue_delivery(&self.db, &self.queue, &notification, Channel::Email).await
                {
                    tracing::warn!(
                        error = ?err,
                        notification_id = %notification.id,
                        "failed to enqueue digest email"
                    );
                }
            }
        }

        Ok(flushed)
    }
}

/// Build the single summary notification for a drained bucket.
pub fn build_summary(user_id: Uuid, window: DigestWindow, events: &[DigestEvent]) -> NewNotification {
    let mut materials: Vec<&str> = events
        .iter()
        .map(|event| event.material_type.as_str())
        .collect();
    materials.sort_unstable();
    materials.dedup();

    let title = match window {
        DigestWindow::Daily => "Daily price digest".to_string(),
        DigestWindow::Weekly => "Weekly price report".to_string(),
    };
    let message = format!(
        "{} price alert(s) across {} material(s): {}",
        events.len(),
        materials.len(),
        materials.join(", ")
    );

    let data = serde_json::json!({
        "events": events
            .iter()
            .map(|event| {
                serde_json::json!({
                    "rule_id": event.rule_id,
                    "material_type": event.material_type,
                    "region": event.region,
                    "price": event.price,
                    "previous_price": event.previous_price,
                    "change_percent": event.change_percent,
                })
            })
            .collect::<Vec<_>>(),
    });

    NewNotification {
        user_id,
        kind: window.kind(),
        title,
        message,
        priority: Priority::Medium,
        data: Some(data),
    }
}

fn digest_event_from_row(row: &PgRow) -> Result<DigestEvent> {
    let window: String = row.get("window_kind");
    let window = DigestWindow::from_db(&window)
        .ok_or_else(|| anyhow::anyhow!("unknown digest window: {}", window))?;

    Ok(DigestEvent {
        id: row.get("id"),
        user_id: row.get("user_id"),
        rule_id: row.get("rule_id"),
        window,
        material_type: row.get("material_type"),
        region: row.get("region"),
        price: row.get("price"),
        previous_price: row.get("previous_price"),
        change_percent: row.get("change_percent"),
        created_at: row.get("created_at"),
        due_at: row.get("due_at"),
    })
}
