//! HTTP round-trip tests against live Postgres/Redis/SQS. These skip when
//! TEST_DATABASE_URL / TEST_REDIS_URL / TEST_QUEUE_ENDPOINT are not set, so
//! the default `cargo test` run stays green without services.

mod common;

use axum::http::StatusCode;
use common::{app, TEST_FEED_TOKEN};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

fn stamp(base: OffsetDateTime, secs: i64) -> String {
    (base + Duration::seconds(secs))
        .format(&Rfc3339)
        .expect("format timestamp")
}

macro_rules! require_app {
    () => {
        match app().await {
            Some(app) => app,
            None => {
                eprintln!("skipping: TEST_DATABASE_URL/TEST_REDIS_URL/TEST_QUEUE_ENDPOINT not set");
                return;
            }
        }
    };
}

#[tokio::test]
async fn signup_login_me_roundtrip() {
    let app = require_app!();

    let resp = app
        .post_json(
            "/auth/signup",
            json!({
                "email": "roundtrip@example.com",
                "display_name": "Roundtrip",
                "password": "longenoughpw"
            }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "email": "roundtrip@example.com", "password": "longenoughpw" }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let token = resp.json()["access_token"]
        .as_str()
        .expect("access token")
        .to_string();

    let resp = app.get("/auth/me", Some(&token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["email"], "roundtrip@example.com");
}

#[tokio::test]
async fn rule_crud_roundtrip() {
    let app = require_app!();
    let user = app.create_user("rule_crud").await;

    let resp = app
        .post_json(
            "/rules",
            json!({
                "material_type": "Bakır",
                "region": "Ankara",
                "condition": "above",
                "threshold": 750.0,
                "channels": ["in_app", "email"],
                "frequency": "instant"
            }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let rule_id = resp.json()["id"].as_str().expect("rule id").to_string();
    assert_eq!(resp.json()["is_active"], true);

    let resp = app.get("/rules", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json().as_array().unwrap().len(), 1);

    let resp = app
        .patch_json(
            &format!("/rules/{}", rule_id),
            json!({ "is_active": false, "threshold": 800.0 }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["is_active"], false);
    assert_eq!(resp.json()["threshold"], 800.0);

    let resp = app
        .delete(&format!("/rules/{}", rule_id), Some(&user.access_token))
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let resp = app.get("/rules", Some(&user.access_token)).await;
    assert!(resp.json().as_array().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_rule_payloads() {
    let app = require_app!();
    let user = app.create_user("rule_invalid").await;

    // Negative threshold.
    let resp = app
        .post_json(
            "/rules",
            json!({
                "material_type": "Bakır",
                "condition": "above",
                "threshold": -1.0,
                "channels": ["in_app"],
                "frequency": "instant"
            }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    // Empty channel list.
    let resp = app
        .post_json(
            "/rules",
            json!({
                "material_type": "Bakır",
                "condition": "below",
                "threshold": 10.0,
                "channels": [],
                "frequency": "instant"
            }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn observation_sequence_fires_exactly_once() {
    let app = require_app!();
    let user = app.create_user("edge_fire").await;

    let resp = app
        .post_json(
            "/rules",
            json!({
                "material_type": "Hurda Kağıt",
                "region": "İstanbul",
                "condition": "above",
                "threshold": 2000.0,
                "channels": ["in_app"],
                "frequency": "instant"
            }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);

    let base = OffsetDateTime::now_utc();
    for (i, price) in [1900.0, 1950.0, 2100.0, 2050.0, 2200.0].iter().enumerate() {
        let resp = app
            .post_feed(
                "/observations",
                json!({
                    "material_type": "Hurda Kağıt",
                    "region": "İstanbul",
                    "price": price,
                    "observed_at": stamp(base, i as i64),
                }),
                Some(TEST_FEED_TOKEN),
            )
            .await;
        assert_eq!(resp.status, StatusCode::ACCEPTED);
    }

    // 2100 crosses up; 2050 stays above the threshold, so 2200 must not
    // fire again.
    let resp = app.get("/notifications", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let items = resp.json()["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["kind"], "price_alert");
    assert_eq!(items[0]["data"]["price"], 2100.0);
}

#[tokio::test]
async fn out_of_order_observations_are_rejected() {
    let app = require_app!();

    let base = OffsetDateTime::now_utc();
    let resp = app
        .post_feed(
            "/observations",
            json!({
                "material_type": "Alüminyum",
                "region": "İzmir",
                "price": 500.0,
                "observed_at": stamp(base, 60),
            }),
            Some(TEST_FEED_TOKEN),
        )
        .await;
    assert_eq!(resp.status, StatusCode::ACCEPTED);

    let resp = app
        .post_feed(
            "/observations",
            json!({
                "material_type": "Alüminyum",
                "region": "İzmir",
                "price": 510.0,
                "observed_at": stamp(base, 0),
            }),
            Some(TEST_FEED_TOKEN),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn ingest_requires_the_feed_token() {
    let app = require_app!();

    let resp = app
        .post_feed(
            "/observations",
            json!({
                "material_type": "Bakır",
                "region": "Ankara",
                "price": 100.0,
                "observed_at": stamp(OffsetDateTime::now_utc(), 0),
            }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn mark_read_is_idempotent_over_http() {
    let app = require_app!();
    let user = app.create_user("mark_read").await;

    let notification = hurda::app::notifications::NotificationService::new(app.state.db.clone())
        .insert(hurda::app::notifications::NewNotification {
            user_id: user.id,
            kind: hurda::domain::notification::NotificationKind::PriceAlert,
            title: "Price alert: Bakır".to_string(),
            message: "Bakır in Ankara rose above 700.00 (now 750.00)".to_string(),
            priority: hurda::domain::notification::Priority::Medium,
            data: None,
        })
        .await
        .expect("insert notification");

    let path = format!("/notifications/{}/read", notification.id);

    let resp = app.post_json(&path, json!({}), Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let read_at_after_first: Option<String> =
        sqlx::query_scalar("SELECT read_at::text FROM notifications WHERE id = $1")
            .bind(notification.id)
            .fetch_one(app.state.db.pool())
            .await
            .expect("read read_at");
    assert!(read_at_after_first.is_some());

    // Second acknowledgement: still 204, read_at untouched.
    let resp = app.post_json(&path, json!({}), Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let read_at_after_second: Option<String> =
        sqlx::query_scalar("SELECT read_at::text FROM notifications WHERE id = $1")
            .bind(notification.id)
            .fetch_one(app.state.db.pool())
            .await
            .expect("read read_at");
    assert_eq!(read_at_after_first, read_at_after_second);

    let resp = app.get("/notifications/unread", Some(&user.access_token)).await;
    assert_eq!(resp.json()["unread"], 0);
}

#[tokio::test]
async fn preferences_roundtrip_and_validation() {
    let app = require_app!();
    let user = app.create_user("prefs").await;

    // Defaults come back before anything is saved.
    let resp = app.get("/preferences", Some(&user.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["email_enabled"], true);

    let resp = app
        .put_json(
            "/preferences",
            json!({
                "email_enabled": true,
                "sms_enabled": false,
                "push_enabled": true,
                "in_app_enabled": true,
                "price_alerts_enabled": true,
                "daily_digest_enabled": true,
                "weekly_report_enabled": false,
                "utc_offset_minutes": 180,
                "quiet_hours": { "enabled": true, "start_time": "22:00", "end_time": "06:00" }
            }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = app.get("/preferences", Some(&user.access_token)).await;
    assert_eq!(resp.json()["sms_enabled"], false);
    assert_eq!(resp.json()["quiet_hours"]["start_time"], "22:00");
    assert_eq!(resp.json()["utc_offset_minutes"], 180);

    // Quiet hours enabled without an end bound are rejected.
    let resp = app
        .put_json(
            "/preferences",
            json!({
                "email_enabled": true,
                "sms_enabled": true,
                "push_enabled": true,
                "in_app_enabled": true,
                "price_alerts_enabled": true,
                "daily_digest_enabled": true,
                "weekly_report_enabled": true,
                "utc_offset_minutes": 0,
                "quiet_hours": { "enabled": true, "start_time": "22:00", "end_time": null }
            }),
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}
