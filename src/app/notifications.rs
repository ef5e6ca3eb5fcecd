use anyhow::Result;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::notification::{Notification, NotificationKind, Priority};
use crate::infra::db::Db;

#[derive(Clone)]
pub struct NotificationService {
    db: Db,
}

#[derive(Debug)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub data: Option<Value>,
}

impl NotificationService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append to the user's inbox. The creation timestamp is assigned here;
    /// the record starts unread.
    pub async fn insert(&self, new: NewNotification) -> Result<Notification> {
        let row = sqlx::query(
            "INSERT INTO notifications (id, user_id, kind, title, message, priority, data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, user_id, kind, title, message, priority, data, read_at, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.kind.as_db())
        .bind(new.title)
        .bind(new.message)
        .bind(new.priority.as_db())
        .bind(new.data)
        .fetch_one(self.db.pool())
        .await?;

        notification_from_row(&row)
    }

    pub async fn get(&self, notification_id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(
            "SELECT id, user_id, kind, title, message, priority, data, read_at, created_at \
             FROM notifications WHERE id = $1",
        )
        .bind(notification_id)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(notification_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = match cursor {
            Some((created_at, notification_id)) => {
                sqlx::query(
                    "SELECT id, user_id, kind, title, message, priority, data, read_at, created_at \
                     FROM notifications \
                     WHERE user_id = $1 \
                       AND (created_at < $2 OR (created_at = $2 AND id < $3)) \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $4",
                )
                .bind(user_id)
                .bind(created_at)
                .bind(notification_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, user_id, kind, title, message, priority, data, read_at, created_at \
                     FROM notifications \
                     WHERE user_id = $1 \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $2",
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            notifications.push(notification_from_row(&row)?);
        }

        Ok(notifications)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(count)
    }

    /// Idempotent unread → read transition: an already-read notification is
    /// left untouched and reported as unchanged.
    pub async fn mark_read(&self, notification_id: Uuid, user_id: Uuid) -> Result<MarkReadOutcome> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET read_at = now() \
             WHERE id = $1 AND user_id = $2 AND read_at IS NULL",
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(MarkReadOutcome::Acknowledged);
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM notifications WHERE id = $1 AND user_id = $2)",
        )
        .bind(notification_id)
        .bind(user_id)
        .fetch_one(self.db.pool())
        .await?;

        if exists {
            Ok(MarkReadOutcome::AlreadyRead)
        } else {
            Ok(MarkReadOutcome::NotFound)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadOutcome {
    Acknowledged,
    AlreadyRead,
    NotFound,
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    let kind: String = row.get("kind");
    let kind = NotificationKind::from_db(&kind)
        .ok_or_else(|| anyhow::anyhow!("unknown notification kind: {}", kind))?;

    let priority: String = row.get("priority");
    let priority = Priority::from_db(&priority)
        .ok_or_else(|| anyhow::anyhow!("unknown notification priority: {}", priority))?;

    Ok(Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind,
        title: row.get("title"),
        message: row.get("message"),
        priority,
        data: row.get("data"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
    })
}
