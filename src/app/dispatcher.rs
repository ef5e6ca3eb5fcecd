use anyhow::Result;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::digest::{DigestService, DigestWindow};
use crate::app::evaluator::TriggeredRule;
use crate::app::notifications::{NewNotification, NotificationService};
use crate::app::preferences::PreferencesService;
use crate::app::rules::RuleService;
use crate::domain::notification::{Notification, NotificationKind, PriceMovement, Priority};
use crate::domain::preferences::NotificationPreferences;
use crate::domain::rule::{Channel, RuleCondition, RuleFrequency};
use crate::infra::db::Db;
use crate::infra::queue::QueueClient;
use crate::jobs::delivery_worker::DeliveryJob;

/// What a triggered rule turns into, before any side effect happens.
#[derive(Debug)]
pub enum Dispatch {
    /// Daily/weekly rules accumulate into the pending bucket instead of
    /// delivering now.
    Digest { window: DigestWindow },
    /// Instant rules write the inbox record and fan out to the external
    /// channels. `channels` is already intersected with the user's enabled
    /// set; it is empty with `defer_to_digest` set when quiet hours
    /// suppressed external delivery.
    Instant {
        notification: NewNotification,
        channels: Vec<Channel>,
        defer_to_digest: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Skipped,
    Accumulated,
    Delivered { channels: usize },
}

/// Pure dispatch policy: priority, message, channel intersection, quiet
/// hours. The caller claims the fire and performs the writes.
pub fn plan(
    trigger: &TriggeredRule,
    preferences: &NotificationPreferences,
    now: OffsetDateTime,
) -> Dispatch {
    match trigger.rule.frequency {
        RuleFrequency::Daily => {
            return Dispatch::Digest {
                window: DigestWindow::Daily,
            }
        }
        RuleFrequency::Weekly => {
            return Dispatch::Digest {
                window: DigestWindow::Weekly,
            }
        }
        RuleFrequency::Instant => {}
    }

    let notification = alert_notification(trigger);

    let external: Vec<Channel> = trigger
        .rule
        .channels
        .iter()
        .copied()
        .filter(|channel| *channel != Channel::InApp)
        .filter(|channel| preferences.channel_enabled(*channel))
        .collect();

    // Quiet hours suppress email/sms/push and defer them to the next digest;
    // the inbox record is written regardless so the alert is visible on
    // login.
    if preferences.in_quiet_hours(now) && !external.is_empty() {
        return Dispatch::Instant {
            notification,
            channels: Vec::new(),
            defer_to_digest: true,
        };
    }

    Dispatch::Instant {
        notification,
        channels: external,
        defer_to_digest: false,
    }
}

/// Large or fast swings are elevated independent of the configured
/// threshold: a crossing that moved ≥10% from the previous value, or a
/// percent change at least twice the rule's own threshold.
pub fn priority_for(trigger: &TriggeredRule) -> Priority {
    match trigger.rule.condition {
        RuleCondition::Above | RuleCondition::Below => match trigger.change_percent {
            Some(change) if change.abs() >= 10.0 => Priority::High,
            _ => Priority::Medium,
        },
        RuleCondition::ChangePercent => match trigger.change_percent {
            Some(change) if change.abs() >= trigger.rule.threshold * 2.0 => Priority::High,
            _ => Priority::Medium,
        },
    }
}

fn alert_notification(trigger: &TriggeredRule) -> NewNotification {
    let rule = &trigger.rule;
    let message = match rule.condition {
        RuleCondition::Above => format!(
            "{} in {} rose above {:.2} (now {:.2})",
            rule.material_type, trigger.region, rule.threshold, trigger.price
        ),
        RuleCondition::Below => format!(
            "{} in {} fell below {:.2} (now {:.2})",
            rule.material_type, trigger.region, rule.threshold, trigger.price
        ),
        RuleCondition::ChangePercent => format!(
            "{} in {} moved {:+.1}% (from {:.2} to {:.2})",
            rule.material_type,
            trigger.region,
            trigger.change_percent.unwrap_or(0.0),
            trigger.previous_price,
            trigger.price
        ),
    };

    let movement = PriceMovement {
        previous_price: Some(trigger.previous_price),
        price: trigger.price,
        change_percent: trigger.change_percent,
    };

    NewNotification {
        user_id: rule.user_id,
        kind: NotificationKind::PriceAlert,
        title: format!("Price alert: {}", rule.material_type),
        message,
        priority: priority_for(trigger),
        data: serde_json::to_value(&movement).ok(),
    }
}

#[derive(Clone)]
pub struct DispatcherService {
    db: Db,
    queue: QueueClient,
}

impl DispatcherService {
    pub fn new(db: Db, queue: QueueClient) -> Self {
        Self { db, queue }
    }

    pub async fn dispatch(
        &self,
        trigger: &TriggeredRule,
        now: OffsetDateTime,
    ) -> Result<DispatchOutcome> {
        let preferences = PreferencesService::new(self.db.clone())
            .get_or_default(trigger.rule.user_id)
            .await?;

        if !preferences.price_alerts_enabled {
            tracing::debug!(
                rule_id = %trigger.rule.id,
                user_id = %trigger.rule.user_id,
                "price alerts disabled, skipping dispatch"
            );
            return Ok(DispatchOutcome::Skipped);
        }

        // Atomic re-check of is_active plus the rolling-window claim. Losing
        // here means the rule was deactivated since evaluation, or another
        // observation already fired it within the window.
        let claimed = RuleService::new(self.db.clone())
            .claim_fire(trigger.rule.id, now, trigger.rule.frequency.gating_window())
            .await?;
        if !claimed {
            tracing::debug!(rule_id = %trigger.rule.id, "fire claim lost, skipping dispatch");
            return Ok(DispatchOutcome::Skipped);
        }

        let digest = DigestService::new(self.db.clone(), self.queue.clone());

        match plan(trigger, &preferences, now) {
            Dispatch::Digest { window } => {
                digest.accumulate(trigger, window, now).await?;
                Ok(DispatchOutcome::Accumulated)
            }
            Dispatch::Instant {
                notification,
                channels,
                defer_to_digest,
            } => {
                // Inbox write comes first and is the only delivery that must
                // succeed.
                let notification = NotificationService::new(self.db.clone())
                    .insert(notification)
                    .await?;

                let mut enqueued = 0;
                for channel in channels {
                    match enqueue_delivery(&self.db, &self.queue, &notification, channel).await {
                        Ok(()) => enqueued += 1,
                        Err(err) => {
                            tracing::warn!(
                                error = ?err,
                                notification_id = %notification.id,
                                channel = channel.as_db(),
                                "failed to enqueue delivery"
                            );
                        }
                    }
                }

                if defer_to_digest {
                    if let Err(err) = digest.accumulate(trigger, DigestWindow::Daily, now).await {
                        tracing::warn!(
                            error = ?err,
                            rule_id = %trigger.rule.id,
                            "failed to defer suppressed delivery to digest"
                        );
                    }
                }

                Ok(DispatchOutcome::Delivered { channels: enqueued })
            }
        }
    }
}

/// Record a pending delivery attempt and hand it to the worker queue. One
/// attempt row per (notification, channel); a failing channel never affects
/// the others.
pub async fn enqueue_delivery(
    db: &Db,
    queue: &QueueClient,
    notification: &Notification,
    channel: Channel,
) -> Result<()> {
    let attempt_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO delivery_attempts (id, notification_id, user_id, channel, status, attempts) \
         VALUES ($1, $2, $3, $4, 'pending', 0)",
    )
    .bind(attempt_id)
    .bind(notification.id)
    .bind(notification.user_id)
    .bind(channel.as_db())
    .execute(db.pool())
    .await?;

    queue
        .enqueue_delivery_job(&DeliveryJob {
            attempt_id,
            notification_id: notification.id,
            user_id: notification.user_id,
            channel,
        })
        .await?;

    Ok(())
}
