use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PriceAlert,
    DailyDigest,
    WeeklyReport,
}

impl NotificationKind {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "price_alert" => Some(Self::PriceAlert),
            "daily_digest" => Some(Self::DailyDigest),
            "weekly_report" => Some(Self::WeeklyReport),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::PriceAlert => "price_alert",
            Self::DailyDigest => "daily_digest",
            Self::WeeklyReport => "weekly_report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub data: Option<Value>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// One-way unread → read transition. Returns false (and leaves `read_at`
    /// untouched) when the notification was already acknowledged.
    pub fn acknowledge(&mut self, at: OffsetDateTime) -> bool {
        if self.read_at.is_some() {
            return false;
        }
        self.read_at = Some(at.max(self.created_at));
        true
    }
}

/// Structured payload attached to price-alert notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceMovement {
    pub previous_price: Option<f64>,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
}
