use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::domain::observation::PriceObservation;
use crate::domain::rule::{NotificationRule, RuleCondition};

/// A rule that fired for one observation, together with the movement context
/// the dispatcher needs.
#[derive(Debug, Clone)]
pub struct TriggeredRule {
    pub rule: NotificationRule,
    /// Region of the triggering observation (the rule's own filter may be
    /// unset).
    pub region: String,
    pub price: f64,
    pub previous_price: f64,
    /// Signed percent move from the previous observation. None when the
    /// previous price was zero (undefined percentage).
    pub change_percent: Option<f64>,
}

/// Determine which rules fire for one observation.
///
/// Pure: reads the rule set, the previous observation for the same
/// (material_type, region) key, and the per-rule last-fired timestamps
/// carried on the rules; mutates nothing. The caller owns all state and
/// records the fire afterwards.
///
/// `above`/`below` are edge-triggered against the previous observation, so a
/// sustained run past the threshold fires once at the crossing. With no
/// previous observation for the key, no condition can establish a crossing
/// or a baseline, and nothing fires.
pub fn evaluate(
    observation: &PriceObservation,
    rules: &[NotificationRule],
    previous: Option<&PriceObservation>,
    now: OffsetDateTime,
) -> Vec<TriggeredRule> {
    let mut triggered = Vec::new();

    for rule in rules {
        if !rule.is_active {
            continue;
        }
        if rule.material_type != observation.material_type {
            continue;
        }
        if let Some(region) = &rule.region {
            if region != &observation.region {
                continue;
            }
        }

        if !rule.threshold_is_valid() {
            warn!(
                rule_id = %rule.id,
                threshold = rule.threshold,
                "skipping rule with invalid threshold"
            );
            continue;
        }

        // Rolling-window gating for daily/weekly rules.
        if let Some(window) = rule.frequency.gating_window() {
            if let Some(last_fired) = rule.last_fired_at {
                if last_fired > now - window {
                    continue;
                }
            }
        }

        let previous_price = match previous {
            Some(previous) => previous.price,
            None => {
                debug!(
                    rule_id = %rule.id,
                    material_type = %observation.material_type,
                    region = %observation.region,
                    "no previous observation for key, rule not eligible"
                );
                continue;
            }
        };

        let change_percent = if previous_price != 0.0 {
            Some((observation.price - previous_price) / previous_price * 100.0)
        } else {
            None
        };

        let fired = match rule.condition {
            RuleCondition::Above => {
                observation.price > rule.threshold && previous_price <= rule.threshold
            }
            RuleCondition::Below => {
                observation.price < rule.threshold && previous_price >= rule.threshold
            }
            RuleCondition::ChangePercent => match change_percent {
                Some(change) => change.abs() >= rule.threshold,
                // Zero baseline: the percentage is undefined, not an error.
                None => {
                    debug!(rule_id = %rule.id, "zero baseline, change_percent not eligible");
                    false
                }
            },
        };

        if fired {
            triggered.push(TriggeredRule {
                rule: rule.clone(),
                region: observation.region.clone(),
                price: observation.price,
                previous_price,
                change_percent,
            });
        }
    }

    triggered
}
