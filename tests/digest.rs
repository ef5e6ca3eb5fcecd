//! Digest summarization and window semantics.

mod common;

use common::at;
use hurda::app::digest::{build_summary, DigestEvent, DigestWindow};
use hurda::domain::notification::{NotificationKind, Priority};
use time::Duration;
use uuid::Uuid;

fn event(user_id: Uuid, material_type: &str, price: f64, secs: i64) -> DigestEvent {
    DigestEvent {
        id: Uuid::new_v4(),
        user_id,
        rule_id: Uuid::new_v4(),
        window: DigestWindow::Daily,
        material_type: material_type.to_string(),
        region: "İstanbul".to_string(),
        price,
        previous_price: price * 0.9,
        change_percent: Some(11.1),
        created_at: at(secs),
        due_at: at(secs) + Duration::hours(24),
    }
}

#[test]
fn daily_summary_aggregates_events_into_one_notification() {
    let user_id = Uuid::new_v4();
    let events = vec![
        event(user_id, "Hurda Kağıt", 2100.0, 0),
        event(user_id, "Hurda Kağıt", 2200.0, 3600),
        event(user_id, "Bakır", 800.0, 7200),
    ];

    let summary = build_summary(user_id, DigestWindow::Daily, &events);

    assert_eq!(summary.user_id, user_id);
    assert_eq!(summary.kind, NotificationKind::DailyDigest);
    assert_eq!(summary.priority, Priority::Medium);
    assert_eq!(summary.title, "Daily price digest");
    assert!(summary.message.contains("3 price alert(s)"));
    assert!(summary.message.contains("2 material(s)"));

    let data = summary.data.expect("digest payload");
    assert_eq!(data["events"].as_array().unwrap().len(), 3);
}

#[test]
fn weekly_summary_uses_the_report_kind() {
    let user_id = Uuid::new_v4();
    let events = vec![event(user_id, "Alüminyum", 500.0, 0)];

    let summary = build_summary(user_id, DigestWindow::Weekly, &events);
    assert_eq!(summary.kind, NotificationKind::WeeklyReport);
    assert_eq!(summary.title, "Weekly price report");
}

#[test]
fn summary_lists_each_material_once() {
    let user_id = Uuid::new_v4();
    let events = vec![
        event(user_id, "Bakır", 800.0, 0),
        event(user_id, "Bakır", 820.0, 60),
    ];

    let summary = build_summary(user_id, DigestWindow::Daily, &events);
    assert_eq!(summary.message.matches("Bakır").count(), 1);
}

#[test]
fn windows_cover_a_rolling_day_and_week() {
    assert_eq!(DigestWindow::Daily.duration(), Duration::hours(24));
    assert_eq!(DigestWindow::Weekly.duration(), Duration::days(7));
    assert_eq!(DigestWindow::from_db("daily"), Some(DigestWindow::Daily));
    assert_eq!(DigestWindow::from_db("monthly"), None);
}
