//! Domain invariants: read acknowledgement, quiet-hours windows, preference
//! defaults.

mod common;

use common::{at, clock, preferences, quiet_hours};
use hurda::domain::notification::{Notification, NotificationKind, Priority};
use hurda::domain::preferences::QuietHours;
use hurda::domain::rule::Channel;
use uuid::Uuid;

fn unread_notification() -> Notification {
    Notification {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        kind: NotificationKind::PriceAlert,
        title: "Price alert: Hurda Kağıt".to_string(),
        message: "Hurda Kağıt in İstanbul rose above 2000.00 (now 2100.00)".to_string(),
        priority: Priority::Medium,
        data: None,
        read_at: None,
        created_at: at(0),
    }
}

#[test]
fn acknowledge_is_idempotent() {
    let mut notification = unread_notification();

    assert!(notification.acknowledge(at(60)));
    let first_read_at = notification.read_at;
    assert!(first_read_at.is_some());

    // Second acknowledgement is a no-op and leaves read_at unchanged.
    assert!(!notification.acknowledge(at(7200)));
    assert_eq!(notification.read_at, first_read_at);
    assert!(notification.is_read());
}

#[test]
fn read_at_never_precedes_created_at() {
    let mut notification = unread_notification();
    notification.acknowledge(at(-60));
    assert_eq!(notification.read_at, Some(notification.created_at));
}

#[test]
fn quiet_hours_require_both_bounds_when_enabled() {
    let missing_end = QuietHours {
        enabled: true,
        start_time: Some(clock(22, 0)),
        end_time: None,
    };
    assert!(missing_end.validate().is_err());

    assert!(quiet_hours(clock(22, 0), clock(6, 0)).validate().is_ok());

    // Disabled windows need no bounds at all.
    assert!(QuietHours::disabled().validate().is_ok());
}

#[test]
fn disabled_quiet_hours_contain_nothing() {
    let window = QuietHours::disabled();
    assert!(!window.contains(clock(3, 0)));
}

#[test]
fn same_day_window_is_half_open() {
    let window = quiet_hours(clock(9, 0), clock(17, 0));
    assert!(window.contains(clock(9, 0)));
    assert!(window.contains(clock(16, 59)));
    assert!(!window.contains(clock(17, 0)));
    assert!(!window.contains(clock(8, 59)));
}

#[test]
fn wrapping_window_covers_evening_and_early_morning() {
    let window = quiet_hours(clock(22, 0), clock(6, 0));
    assert!(window.contains(clock(23, 30)));
    assert!(window.contains(clock(0, 0)));
    assert!(window.contains(clock(5, 59)));
    assert!(!window.contains(clock(6, 0)));
    assert!(!window.contains(clock(12, 0)));
}

#[test]
fn default_preferences_enable_every_channel() {
    let prefs = preferences(Uuid::new_v4());
    assert!(prefs.channel_enabled(Channel::Email));
    assert!(prefs.channel_enabled(Channel::Sms));
    assert!(prefs.channel_enabled(Channel::Push));
    assert!(prefs.channel_enabled(Channel::InApp));
    assert!(prefs.price_alerts_enabled);
    assert!(!prefs.quiet_hours.enabled);
}

#[test]
fn local_time_applies_the_user_offset() {
    let mut prefs = preferences(Uuid::new_v4());
    prefs.utc_offset_minutes = 180;

    let noon_utc = at(0).replace_time(clock(12, 0));
    assert_eq!(prefs.local_time(noon_utc), clock(15, 0));
}
