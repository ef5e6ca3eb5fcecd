use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    Above,
    Below,
    ChangePercent,
}

impl RuleCondition {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "above" => Some(Self::Above),
            "below" => Some(Self::Below),
            "change_percent" => Some(Self::ChangePercent),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::ChangePercent => "change_percent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFrequency {
    Instant,
    Daily,
    Weekly,
}

impl RuleFrequency {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "instant" => Some(Self::Instant),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    /// Rolling window within which a gated rule may fire at most once.
    /// `Instant` rules are not window-gated.
    pub fn gating_window(&self) -> Option<Duration> {
        match self {
            Self::Instant => None,
            Self::Daily => Some(Duration::hours(24)),
            Self::Weekly => Some(Duration::days(7)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
    InApp,
}

impl Channel {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "push" => Some(Self::Push),
            "in_app" => Some(Self::InApp),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::InApp => "in_app",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub material_type: String,
    pub region: Option<String>,
    pub condition: RuleCondition,
    pub threshold: f64,
    pub channels: Vec<Channel>,
    pub frequency: RuleFrequency,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_fired_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl NotificationRule {
    /// Thresholds are absolute prices for `above`/`below` and percentages
    /// for `change_percent`; either way they must be finite and non-negative.
    pub fn threshold_is_valid(&self) -> bool {
        self.threshold.is_finite() && self.threshold >= 0.0
    }
}
