use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::preferences::{NotificationPreferences, QuietHours};
use crate::infra::db::Db;

#[derive(Clone)]
pub struct PreferencesService {
    db: Db,
}

impl PreferencesService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// A user who never saved settings gets the defaults (all channels on,
    /// quiet hours off).
    pub async fn get_or_default(&self, user_id: Uuid) -> Result<NotificationPreferences> {
        let row = sqlx::query(
            "SELECT user_id, email_enabled, sms_enabled, push_enabled, in_app_enabled, \
                    price_alerts_enabled, daily_digest_enabled, weekly_report_enabled, \
                    utc_offset_minutes, dnd_enabled, dnd_start_time, dnd_end_time \
             FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => Ok(preferences_from_row(&row)),
            None => Ok(NotificationPreferences::defaults(user_id)),
        }
    }

    pub async fn upsert(&self, preferences: &NotificationPreferences) -> Result<()> {
        sqlx::query(
            "INSERT INTO notification_preferences \
             (user_id, email_enabled, sms_enabled, push_enabled, in_app_enabled, \
              price_alerts_enabled, daily_digest_enabled, weekly_report_enabled, \
              utc_offset_minutes, dnd_enabled, dnd_start_time, dnd_end_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (user_id) DO UPDATE SET \
             email_enabled = EXCLUDED.email_enabled, \
             sms_enabled = EXCLUDED.sms_enabled, \
             push_enabled = EXCLUDED.push_enabled, \
             in_app_enabled = EXCLUDED.in_app_enabled, \
             price_alerts_enabled = EXCLUDED.price_alerts_enabled, \
             daily_digest_enabled = EXCLUDED.daily_digest_enabled, \
             weekly_report_enabled = EXCLUDED.weekly_report_enabled, \
             utc_offset_minutes = EXCLUDED.utc_offset_minutes, \
             dnd_enabled = EXCLUDED.dnd_enabled, \
             dnd_start_time = EXCLUDED.dnd_start_time, \
             dnd_end_time = EXCLUDED.dnd_end_time",
        )
        .bind(preferences.user_id)
        .bind(preferences.email_enabled)
        .bind(preferences.sms_enabled)
        .bind(preferences.push_enabled)
        .bind(preferences.in_app_enabled)
        .bind(preferences.price_alerts_enabled)
        .bind(preferences.daily_digest_enabled)
        .bind(preferences.weekly_report_enabled)
        .bind(preferences.utc_offset_minutes)
        .bind(preferences.quiet_hours.enabled)
        .bind(preferences.quiet_hours.start_time)
        .bind(preferences.quiet_hours.end_time)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }
}

fn preferences_from_row(row: &PgRow) -> NotificationPreferences {
    NotificationPreferences {
        user_id: row.get("user_id"),
        email_enabled: row.get("email_enabled"),
        sms_enabled: row.get("sms_enabled"),
        push_enabled: row.get("push_enabled"),
        in_app_enabled: row.get("in_app_enabled"),
        price_alerts_enabled: row.get("price_alerts_enabled"),
        daily_digest_enabled: row.get("daily_digest_enabled"),
        weekly_report_enabled: row.get("weekly_report_enabled"),
        utc_offset_minutes: row.get("utc_offset_minutes"),
        quiet_hours: QuietHours {
            enabled: row.get("dnd_enabled"),
            start_time: row.get("dnd_start_time"),
            end_time: row.get("dnd_end_time"),
        },
    }
}
