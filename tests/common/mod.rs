#![allow(dead_code)]

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::net::SocketAddr;
use time::{OffsetDateTime, Time};
use tokio::sync::OnceCell;
use tower::ServiceExt;
use uuid::Uuid;

use hurda::app::auth::AuthService;
use hurda::app::ingest::ObservationLedger;
use hurda::config::AppConfig;
use hurda::domain::observation::PriceObservation;
use hurda::domain::preferences::{NotificationPreferences, QuietHours};
use hurda::domain::rule::{Channel, NotificationRule, RuleCondition, RuleFrequency};
use hurda::infra::{cache::RedisCache, db::Db, queue::QueueClient};
use hurda::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// 32 bytes base64-encoded (test-only keys — NOT used in production)
// "0123456789abcdef0123456789abcdef" (32 bytes)
const TEST_PASETO_ACCESS_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
// "fedcba9876543210fedcba9876543210" (32 bytes)
const TEST_PASETO_REFRESH_KEY: &str = "ZmVkY2JhOTg3NjU0MzIxMGZlZGNiYTk4NzY1NDMyMTA=";
pub const TEST_FEED_TOKEN: &str = "test-feed-token-12345";
pub const DEFAULT_PASSWORD: &str = "testpassword123";

// ---------------------------------------------------------------------------
// Pure fixtures — no infrastructure required
// ---------------------------------------------------------------------------

/// A fixed instant plus an offset in seconds, so sequences of observations
/// get strictly increasing timestamps.
pub fn at(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).expect("valid timestamp")
}

pub fn clock(hours: u8, minutes: u8) -> Time {
    Time::from_hms(hours, minutes, 0).expect("valid clock time")
}

pub fn rule(
    condition: RuleCondition,
    threshold: f64,
    material_type: &str,
    region: Option<&str>,
) -> NotificationRule {
    NotificationRule {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        material_type: material_type.to_string(),
        region: region.map(str::to_string),
        condition,
        threshold,
        channels: vec![Channel::InApp, Channel::Email],
        frequency: RuleFrequency::Instant,
        is_active: true,
        last_fired_at: None,
        created_at: at(0),
    }
}

pub fn observation(material_type: &str, region: &str, price: f64, secs: i64) -> PriceObservation {
    PriceObservation {
        material_type: material_type.to_string(),
        region: region.to_string(),
        price,
        observed_at: at(secs),
    }
}

pub fn preferences(user_id: Uuid) -> NotificationPreferences {
    NotificationPreferences::defaults(user_id)
}

pub fn quiet_hours(start: Time, end: Time) -> QuietHours {
    QuietHours {
        enabled: true,
        start_time: Some(start),
        end_time: Some(end),
    }
}

// ---------------------------------------------------------------------------
// TestApp — shared, lazily initialized once per test binary. Requires live
// Postgres/Redis/SQS endpoints; tests that use it skip when the TEST_* env
// vars are not set.
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

static TEST_APP: OnceCell<Option<TestApp>> = OnceCell::const_new();

/// Get (or lazily create) the shared TestApp instance. None when the test
/// infrastructure env vars are absent; callers should skip in that case.
pub async fn app() -> Option<&'static TestApp> {
    TEST_APP
        .get_or_init(|| async { TestApp::setup().await })
        .await
        .as_ref()
}

impl TestApp {
    async fn setup() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let redis_url = std::env::var("TEST_REDIS_URL").ok()?;
        let queue_endpoint = std::env::var("TEST_QUEUE_ENDPOINT").ok()?;

        // ---- Run migrations against the test database ----
        let db_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("cannot connect to test database");

        let mut migration_files: Vec<_> = std::fs::read_dir("migrations")
            .expect("cannot read migrations/")
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "sql"))
            .collect();
        migration_files.sort_by_key(|e| e.file_name());

        for entry in &migration_files {
            let sql = std::fs::read_to_string(entry.path())
                .unwrap_or_else(|_| panic!("cannot read {:?}", entry.path()));
            sqlx::raw_sql(&sql)
                .execute(&db_pool)
                .await
                .unwrap_or_else(|e| panic!("migration {:?} failed: {}", entry.file_name(), e));
        }

        // ---- Truncate all tables for clean test state ----
        sqlx::raw_sql(
            "DO $$ DECLARE r RECORD; BEGIN \
             FOR r IN (SELECT tablename FROM pg_tables WHERE schemaname = 'public') LOOP \
             EXECUTE 'TRUNCATE TABLE ' || quote_ident(r.tablename) || ' CASCADE'; \
             END LOOP; END $$;",
        )
        .execute(&db_pool)
        .await
        .expect("failed to truncate tables");

        db_pool.close().await;

        // ---- Flush test Redis to clear stale rate-limit counters ----
        {
            let redis_client =
                redis::Client::open(redis_url.as_str()).expect("cannot open Redis client");
            let mut conn = redis_client
                .get_multiplexed_async_connection()
                .await
                .expect("cannot connect to Redis for flush");
            redis::cmd("FLUSHDB")
                .query_async::<_, ()>(&mut conn)
                .await
                .expect("FLUSHDB failed");
        }

        // ---- Build AppState via AppConfig (same code path as production) ----
        std::env::set_var("DATABASE_URL", &database_url);
        std::env::set_var("REDIS_URL", &redis_url);
        std::env::set_var("QUEUE_ENDPOINT", &queue_endpoint);
        std::env::set_var("QUEUE_NAME", "hurda-deliveries-test");
        std::env::set_var("QUEUE_REGION", "us-east-1");
        std::env::set_var("PASETO_ACCESS_KEY", TEST_PASETO_ACCESS_KEY);
        std::env::set_var("PASETO_REFRESH_KEY", TEST_PASETO_REFRESH_KEY);
        std::env::set_var("FEED_TOKEN", TEST_FEED_TOKEN);
        std::env::set_var("APP_MODE", "api");
        std::env::set_var("DB_MAX_CONNECTIONS", "10");
        std::env::set_var("DB_CONNECT_TIMEOUT_SECONDS", "30");
        // Each #[tokio::test] creates a separate tokio runtime, but the pool
        // is shared via OnceCell.  Connections created in one runtime become
        // stale when that runtime is dropped.  Setting idle_timeout to 0 forces
        // the pool to discard all idle connections on acquire and create fresh
        // ones in the current runtime.
        std::env::set_var("DB_IDLE_TIMEOUT_SECONDS", "0");
        std::env::set_var("AWS_ACCESS_KEY_ID", "test");
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "test");
        std::env::set_var("AWS_DEFAULT_REGION", "us-east-1");

        let config = AppConfig::from_env().expect("failed to build AppConfig");

        let db = Db::connect(&config).await.expect("Db::connect failed");
        let cache = RedisCache::connect(&config.redis_url)
            .await
            .expect("Redis connect failed");
        let queue = QueueClient::new(&config).await.expect("QueueClient::new failed");

        let state = AppState {
            db,
            cache,
            queue,
            observations: std::sync::Arc::new(ObservationLedger::new()),
            feed_token: config.feed_token.clone(),
            paseto_access_key: config.paseto_access_key,
            paseto_refresh_key: config.paseto_refresh_key,
            access_ttl_minutes: config.access_ttl_minutes,
            refresh_ttl_days: config.refresh_ttl_days,
        };

        let router = hurda::http::router(state.clone());

        Some(TestApp { router, state })
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        for &(key, value) in headers {
            builder = builder.header(key, value);
        }

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        // Inject ConnectInfo so IP rate limiting can extract an address.
        let mut request = request;
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::GET, path, None, &headers).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::POST, path, Some(body), &headers).await
    }

    pub async fn patch_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::PATCH, path, Some(body), &headers)
            .await
    }

    pub async fn put_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::PUT, path, Some(body), &headers).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        let auth;
        if let Some(t) = token {
            auth = format!("Bearer {}", t);
            headers.push(("Authorization", auth.as_str()));
        }
        self.request(Method::DELETE, path, None, &headers).await
    }

    /// POST with the feed token header, as the price-feed collaborator does.
    pub async fn post_feed(&self, path: &str, body: Value, feed_token: Option<&str>) -> TestResponse {
        let mut headers = vec![];
        if let Some(t) = feed_token {
            headers.push(("x-feed-token", t));
        }
        self.request(Method::POST, path, Some(body), &headers).await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// Create a user directly in the DB and log in via AuthService to obtain
    /// tokens without burning the IP signup/login rate limits.
    pub async fn create_user(&self, suffix: &str) -> TestUser {
        let email = format!("test_{}@example.com", suffix);
        let display_name = format!("Test User {}", suffix);

        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
        let hash = Argon2::default()
            .hash_password(DEFAULT_PASSWORD.as_bytes(), &salt)
            .expect("password hash failed")
            .to_string();

        let pool = self.state.db.pool();

        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (id, email, display_name, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&display_name)
        .bind(&hash)
        .fetch_one(pool)
        .await
        .expect("insert test user failed");

        let auth_service = AuthService::new(
            self.state.db.clone(),
            self.state.paseto_access_key,
            self.state.paseto_refresh_key,
            self.state.access_ttl_minutes,
            self.state.refresh_ttl_days,
        );
        let tokens = auth_service
            .login(&email, DEFAULT_PASSWORD)
            .await
            .expect("login failed")
            .expect("credentials rejected");

        TestUser {
            id,
            email,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }
    }
}
