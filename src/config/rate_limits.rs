/// Fixed-window rate limits for the HTTP surface. The ingest path is guarded
/// by the feed token instead and is not counted here.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    // Authentication
    pub login_attempts_per_hour: u32,
    pub signups_per_hour_per_ip: u32,

    // Alert rules
    pub rule_mutations_per_hour: u32,

    // Inbox / settings reads and writes
    pub notification_lists_per_hour: u32,
    pub preference_updates_per_hour: u32,
}

impl RateLimits {
    pub fn standard() -> Self {
        RateLimits {
            login_attempts_per_hour: 10,
            signups_per_hour_per_ip: 5,
            rule_mutations_per_hour: 60,
            notification_lists_per_hour: 600,
            preference_updates_per_hour: 30,
        }
    }

    /// Get the limit for a specific action type
    pub fn limit_for_action(&self, action: &str, window: RateWindow) -> Option<u32> {
        match (action, window) {
            ("login", RateWindow::Hour) => Some(self.login_attempts_per_hour),
            ("signup", RateWindow::Hour) => Some(self.signups_per_hour_per_ip),
            ("rules", RateWindow::Hour) => Some(self.rule_mutations_per_hour),
            ("notifications", RateWindow::Hour) => Some(self.notification_lists_per_hour),
            ("preferences", RateWindow::Hour) => Some(self.preference_updates_per_hour),
            _ => None,
        }
    }
}

/// Time window for rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    Hour,
    Day,
}

impl RateWindow {
    pub fn seconds(&self) -> u64 {
        match self {
            RateWindow::Hour => 3600,
            RateWindow::Day => 86400,
        }
    }
}

/// Calculate current window timestamp for rate limiting
pub fn current_window(window_seconds: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    now / window_seconds
}
