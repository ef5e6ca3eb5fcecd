use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, Time, UtcOffset};
use uuid::Uuid;

use crate::domain::rule::Channel;

/// Do-not-disturb window in the user's local clock. The interval may wrap
/// past midnight (`end < start` means "evening through next morning").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    #[serde(default, with = "clock_opt")]
    pub start_time: Option<Time>,
    #[serde(default, with = "clock_opt")]
    pub end_time: Option<Time>,
}

impl QuietHours {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            start_time: None,
            end_time: None,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.enabled && (self.start_time.is_none() || self.end_time.is_none()) {
            return Err("quiet hours require both start_time and end_time when enabled");
        }
        Ok(())
    }

    /// Whether `now` falls within `[start, end)`, wrapping past midnight
    /// when `end < start`. Always false when disabled or unconfigured.
    pub fn contains(&self, now: Time) -> bool {
        if !self.enabled {
            return false;
        }
        let (start, end) = match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (start, end),
            _ => return false,
        };
        if start <= end {
            start <= now && now < end
        } else {
            now >= start || now < end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub price_alerts_enabled: bool,
    pub daily_digest_enabled: bool,
    pub weekly_report_enabled: bool,
    /// Offset applied to UTC instants to derive the user's wall clock for
    /// quiet-hours checks.
    pub utc_offset_minutes: i32,
    pub quiet_hours: QuietHours,
}

impl NotificationPreferences {
    pub fn defaults(user_id: Uuid) -> Self {
        Self {
            user_id,
            email_enabled: true,
            sms_enabled: true,
            push_enabled: true,
            in_app_enabled: true,
            price_alerts_enabled: true,
            daily_digest_enabled: true,
            weekly_report_enabled: true,
            utc_offset_minutes: 0,
            quiet_hours: QuietHours::disabled(),
        }
    }

    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::Push => self.push_enabled,
            Channel::InApp => self.in_app_enabled,
        }
    }

    pub fn local_time(&self, at: OffsetDateTime) -> Time {
        let offset = UtcOffset::from_whole_seconds(self.utc_offset_minutes * 60)
            .unwrap_or(UtcOffset::UTC);
        at.to_offset(offset).time()
    }

    pub fn in_quiet_hours(&self, at: OffsetDateTime) -> bool {
        self.quiet_hours.contains(self.local_time(at))
    }
}

/// Serializes `Option<Time>` as "HH:MM" local clock strings.
mod clock_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Time;

    pub fn serialize<S>(value: &Option<Time>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => {
                serializer.serialize_some(&format!("{:02}:{:02}", time.hour(), time.minute()))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Time>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;
        match value {
            None => Ok(None),
            Some(raw) => parse_clock(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid clock time: {}", raw))),
        }
    }

    fn parse_clock(raw: &str) -> Option<Time> {
        let (hours, minutes) = raw.split_once(':')?;
        let hours: u8 = hours.parse().ok()?;
        let minutes: u8 = minutes.parse().ok()?;
        Time::from_hms(hours, minutes, 0).ok()
    }
}
