use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::rule::{Channel, NotificationRule, RuleCondition, RuleFrequency};
use crate::infra::db::Db;

#[derive(Clone)]
pub struct RuleService {
    db: Db,
}

pub struct NewRule {
    pub user_id: Uuid,
    pub material_type: String,
    pub region: Option<String>,
    pub condition: RuleCondition,
    pub threshold: f64,
    pub channels: Vec<Channel>,
    pub frequency: RuleFrequency,
}

#[derive(Default)]
pub struct RuleUpdate {
    pub material_type: Option<String>,
    pub region: Option<String>,
    pub condition: Option<RuleCondition>,
    pub threshold: Option<f64>,
    pub channels: Option<Vec<Channel>>,
    pub frequency: Option<RuleFrequency>,
    pub is_active: Option<bool>,
}

impl RuleService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create(&self, new_rule: NewRule) -> Result<NotificationRule> {
        let channels: Vec<String> = new_rule
            .channels
            .iter()
            .map(|channel| channel.as_db().to_string())
            .collect();

        let row = sqlx::query(
            "INSERT INTO notification_rules \
             (id, user_id, material_type, region, condition, threshold, channels, frequency, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE) \
             RETURNING id, user_id, material_type, region, condition, threshold, channels, \
                       frequency, is_active, last_fired_at, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(new_rule.user_id)
        .bind(new_rule.material_type)
        .bind(new_rule.region)
        .bind(new_rule.condition.as_db())
        .bind(new_rule.threshold)
        .bind(channels)
        .bind(new_rule.frequency.as_db())
        .fetch_one(self.db.pool())
        .await?;

        rule_from_row(&row)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<NotificationRule>> {
        let rows = sqlx::query(
            "SELECT id, user_id, material_type, region, condition, threshold, channels, \
                    frequency, is_active, last_fired_at, created_at \
             FROM notification_rules \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            rules.push(rule_from_row(&row)?);
        }
        Ok(rules)
    }

    pub async fn update(
        &self,
        rule_id: Uuid,
        user_id: Uuid,
        update: RuleUpdate,
    ) -> Result<Option<NotificationRule>> {
        let channels: Option<Vec<String>> = update.channels.map(|channels| {
            channels
                .iter()
                .map(|channel| channel.as_db().to_string())
                .collect()
        });

        let row = sqlx::query(
            "UPDATE notification_rules SET \
             material_type = COALESCE($3, material_type), \
             region = COALESCE($4, region), \
             condition = COALESCE($5, condition), \
             threshold = COALESCE($6, threshold), \
             channels = COALESCE($7, channels), \
             frequency = COALESCE($8, frequency), \
             is_active = COALESCE($9, is_active) \
             WHERE id = $1 AND user_id = $2 \
             RETURNING id, user_id, material_type, region, condition, threshold, channels, \
                       frequency, is_active, last_fired_at, created_at",
        )
        .bind(rule_id)
        .bind(user_id)
        .bind(update.material_type)
        .bind(update.region)
        .bind(update.condition.map(|condition| condition.as_db()))
        .bind(update.threshold)
        .bind(channels)
        .bind(update.frequency.map(|frequency| frequency.as_db()))
        .bind(update.is_active)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(rule_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, rule_id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notification_rules WHERE id = $1 AND user_id = $2")
            .bind(rule_id)
            .bind(user_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active rules that could match an observation for the given key:
    /// exact material type, and either no region filter or the same region.
    /// Rows with values this build does not understand are skipped with a
    /// diagnostic rather than failing the batch.
    pub async fn list_active_for_scope(
        &self,
        material_type: &str,
        region: &str,
    ) -> Result<Vec<NotificationRule>> {
        let rows = sqlx::query(
            "SELECT id, user_id, material_type, region, condition, threshold, channels, \
                    frequency, is_active, last_fired_at, created_at \
             FROM notification_rules \
             WHERE is_active = TRUE \
               AND material_type = $1 \
               AND (region IS NULL OR region = $2) \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(material_type)
        .bind(region)
        .fetch_all(self.db.pool())
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            match rule_from_row(&row) {
                Ok(rule) => rules.push(rule),
                Err(err) => {
                    let rule_id: Uuid = row.get("id");
                    tracing::warn!(error = ?err, rule_id = %rule_id, "skipping malformed rule");
                }
            }
        }
        Ok(rules)
    }

    /// Atomically record a fire for the rule. The WHERE clause re-checks
    /// `is_active` (a rule deactivated since evaluation must not deliver) and
    /// enforces the rolling gating window, so concurrent observations for
    /// different keys cannot double-fire a daily/weekly rule. Returns whether
    /// this caller won the claim.
    pub async fn claim_fire(
        &self,
        rule_id: Uuid,
        now: OffsetDateTime,
        gating_window: Option<Duration>,
    ) -> Result<bool> {
        let cutoff = match gating_window {
            Some(window) => now - window,
            None => now,
        };

        let result = sqlx::query(
            "UPDATE notification_rules \
             SET last_fired_at = $2 \
             WHERE id = $1 \
               AND is_active = TRUE \
               AND (last_fired_at IS NULL OR last_fired_at <= $3)",
        )
        .bind(rule_id)
        .bind(now)
        .bind(cutoff)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn rule_from_row(row: &PgRow) -> Result<NotificationRule> {
    let condition: String = row.get("condition");
    let condition = RuleCondition::from_db(&condition)
        .ok_or_else(|| anyhow::anyhow!("unknown rule condition: {}", condition))?;

    let frequency: String = row.get("frequency");
    let frequency = RuleFrequency::from_db(&frequency)
        .ok_or_else(|| anyhow::anyhow!("unknown rule frequency: {}", frequency))?;

    let raw_channels: Vec<String> = row.get("channels");
    let mut channels = Vec::with_capacity(raw_channels.len());
    for raw in &raw_channels {
        match Channel::from_db(raw) {
            Some(channel) => channels.push(channel),
            None => tracing::warn!(channel = %raw, "ignoring unknown delivery channel"),
        }
    }

    Ok(NotificationRule {
        id: row.get("id"),
        user_id: row.get("user_id"),
        material_type: row.get("material_type"),
        region: row.get("region"),
        condition,
        threshold: row.get("threshold"),
        channels,
        frequency,
        is_active: row.get("is_active"),
        last_fired_at: row.get("last_fired_at"),
        created_at: row.get("created_at"),
    })
}
